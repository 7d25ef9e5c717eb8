use thiserror::Error;

#[derive(Error, Debug)]
pub enum GovSyncError {
    #[error("State store error: {0}")]
    Store(String),

    #[error("Chain read error: {0}")]
    Chain(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Stored payload could not be decoded; callers treat this as a cache miss
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl From<&str> for GovSyncError {
    fn from(msg: &str) -> Self {
        Self::Custom(msg.to_string())
    }
}

impl From<String> for GovSyncError {
    fn from(msg: String) -> Self {
        Self::Custom(msg)
    }
}

pub type Result<T> = std::result::Result<T, GovSyncError>;
