//! Configuration management for `govsync`
//!
//! Handles loading and validation of application configuration from TOML files.

use std::path::Path;
use std::time::Duration;

use ethers::types::Address;
use serde::Deserialize;
use serde::Serialize;

use crate::sync::types::NonceFunction;
use crate::sync::types::TokenDescriptor;
use crate::GovSyncError;

/// Environment variable pointing at an alternative config file
pub const CONFIG_PATH_ENV: &str = "GOVSYNC_CONFIG";
/// Environment override for `redis.url`
pub const REDIS_URL_ENV: &str = "GOVSYNC_REDIS_URL";
/// Environment override for `chain.rpc_urls` (comma separated)
pub const RPC_URLS_ENV: &str = "GOVSYNC_RPC_URLS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub backtrace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Interchangeable RPC endpoints; tokens are assigned round-robin
    pub rpc_urls: Vec<String>,
    /// Address whose incoming delegations are tracked
    #[serde(default = "default_delegatee")]
    pub delegatee: String,
    /// Maximum block span per log query (provider limit)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
}

fn default_delegatee() -> String {
    "0x08651EeE3b78254653062BA89035b8F8AdF924CE".to_string()
}

const fn default_chunk_size() -> u64 {
    400 // Alchemy eth_getLogs limit
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: String,
    pub genesis_block: u64,
    #[serde(default)]
    pub nonce_function: NonceFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL, e.g. <redis://127.0.0.1:6379>
    pub url: String,
    /// Namespace/prefix for keys (e.g. "govsync:")
    #[serde(default = "default_redis_namespace")]
    pub namespace: String,
}

fn default_redis_namespace() -> String {
    "govsync:".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Start block used when neither a token cursor nor a global cursor exists.
    /// Never earlier than a token's genesis block, so `0` means "from genesis".
    #[serde(default = "default_bootstrap_block")]
    pub bootstrap_block: Option<u64>,
    #[serde(default = "default_week_secs")]
    pub cursor_ttl_secs: u64,
    #[serde(default = "default_week_secs")]
    pub summary_ttl_secs: u64,
    #[serde(default = "default_week_secs")]
    pub active_set_ttl_secs: u64,
    /// Expiry of the store-level sync lock, so a crashed run cannot wedge later runs
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Re-scan chunks that failed in earlier runs
    #[serde(default = "default_retry_failed_ranges")]
    pub retry_failed_ranges: bool,
    /// Poll interval for `govsync watch`
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,
}

/// Block the first governance-v3 delegation sync started from
const fn default_bootstrap_block() -> Option<u64> {
    Some(18_911_987)
}

const fn default_week_secs() -> u64 {
    7 * 24 * 3600
}

const fn default_lock_ttl() -> u64 {
    300 // 5 minutes
}

const fn default_retry_max_attempts() -> u32 {
    3
}

const fn default_retry_base_delay_ms() -> u64 {
    500
}

const fn default_retry_failed_ranges() -> bool {
    true
}

const fn default_watch_interval() -> u64 {
    60
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bootstrap_block: default_bootstrap_block(),
            cursor_ttl_secs: default_week_secs(),
            summary_ttl_secs: default_week_secs(),
            active_set_ttl_secs: default_week_secs(),
            lock_ttl_secs: default_lock_ttl(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_failed_ranges: default_retry_failed_ranges(),
            watch_interval_secs: default_watch_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub chain: ChainConfig,
    #[serde(default = "default_tokens")]
    pub tokens: Vec<TokenConfig>,
    pub redis: RedisConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_tokens() -> Vec<TokenConfig> {
    vec![
        TokenConfig {
            symbol: "AAVE".to_string(),
            address: "0x7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9".to_string(),
            genesis_block: 10_926_829,
            nonce_function: NonceFunction::Underscored,
        },
        TokenConfig {
            symbol: "stkAAVE".to_string(),
            address: "0x4da27a545c0c5B758a6BA100e3a049001de870f5".to_string(),
            genesis_block: 10_927_018,
            nonce_function: NonceFunction::Underscored,
        },
        TokenConfig {
            symbol: "aAAVE".to_string(),
            address: "0xA700b4eB416Be35b2911fd5Dee80678ff64fF6C9".to_string(),
            genesis_block: 16_496_810,
            nonce_function: NonceFunction::Standard,
        },
    ]
}

impl AppConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// - File I/O errors (file not found, permission denied)
    /// - TOML parsing errors (invalid syntax, missing required fields)
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(GovSyncError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(content).map_err(GovSyncError::TomlParsing)?;
        Ok(config)
    }

    /// Load configuration from the default locations and apply environment overrides
    ///
    /// # Errors
    /// - No config file found (neither `$GOVSYNC_CONFIG`, config.toml nor config.example.toml)
    /// - TOML parsing errors
    pub fn load() -> crate::Result<Self> {
        let mut config = if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            Self::from_file(path)?
        } else if Path::new("config.toml").exists() {
            Self::from_file("config.toml")?
        } else if Path::new("config.example.toml").exists() {
            tracing::warn!(
                "Using config.example.toml. Please create config.toml for production use."
            );
            Self::from_file("config.example.toml")?
        } else {
            return Err(GovSyncError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No config file found. Please create config.toml or config.example.toml",
            )));
        };

        config.apply_env_overrides(
            std::env::var(REDIS_URL_ENV).ok(),
            std::env::var(RPC_URLS_ENV).ok(),
        );
        Ok(config)
    }

    /// Override Redis URL and RPC endpoints (credentials usually live in the environment)
    pub fn apply_env_overrides(&mut self, redis_url: Option<String>, rpc_urls: Option<String>) {
        if let Some(url) = redis_url.filter(|u| !u.trim().is_empty()) {
            self.redis.url = url;
        }
        if let Some(urls) = rpc_urls {
            let parsed: Vec<String> = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(ToString::to_string)
                .collect();
            if !parsed.is_empty() {
                self.chain.rpc_urls = parsed;
            }
        }
    }

    /// Reject configurations the sync engine cannot start with
    ///
    /// # Errors
    /// Returns `ConfigError` describing the first problem found
    pub fn validate(&self) -> crate::Result<()> {
        if self.chain.rpc_urls.iter().all(|u| u.trim().is_empty()) {
            return Err(GovSyncError::ConfigError(
                "chain.rpc_urls must contain at least one endpoint".to_string(),
            ));
        }
        if self.redis.url.trim().is_empty() {
            return Err(GovSyncError::ConfigError(
                "redis.url is required".to_string(),
            ));
        }
        if self.chain.chunk_size == 0 {
            return Err(GovSyncError::ConfigError(
                "chain.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.tokens.is_empty() {
            return Err(GovSyncError::ConfigError(
                "at least one [[tokens]] entry is required".to_string(),
            ));
        }
        self.delegatee()?;
        self.token_descriptors()?;
        Ok(())
    }

    /// Parsed delegatee address
    pub fn delegatee(&self) -> crate::Result<Address> {
        parse_address(&self.chain.delegatee)
    }

    /// Token descriptors in configured order
    pub fn token_descriptors(&self) -> crate::Result<Vec<TokenDescriptor>> {
        self.tokens
            .iter()
            .map(|t| {
                Ok(TokenDescriptor {
                    symbol: t.symbol.clone(),
                    address: parse_address(&t.address)?,
                    genesis_block: t.genesis_block,
                    nonce_function: t.nonce_function,
                })
            })
            .collect()
    }

    #[must_use]
    pub const fn chunk_size(&self) -> u64 {
        self.chain.chunk_size
    }

    #[must_use]
    pub fn rpc_urls(&self) -> &[String] {
        &self.chain.rpc_urls
    }

    #[must_use]
    pub const fn cursor_ttl(&self) -> Duration {
        Duration::from_secs(self.sync.cursor_ttl_secs)
    }

    #[must_use]
    pub const fn summary_ttl(&self) -> Duration {
        Duration::from_secs(self.sync.summary_ttl_secs)
    }

    #[must_use]
    pub const fn active_set_ttl(&self) -> Duration {
        Duration::from_secs(self.sync.active_set_ttl_secs)
    }

    #[must_use]
    pub const fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.sync.lock_ttl_secs)
    }

    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.sync.retry_base_delay_ms)
    }

    #[must_use]
    pub const fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.sync.watch_interval_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                backtrace: true,
            },
            chain: ChainConfig {
                rpc_urls: vec!["http://localhost:8545".to_string()],
                delegatee: default_delegatee(),
                chunk_size: default_chunk_size(),
            },
            tokens: default_tokens(),
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                namespace: default_redis_namespace(),
            },
            sync: SyncConfig::default(),
        }
    }
}

/// Parse a hex address, accepting any letter case
pub fn parse_address(value: &str) -> crate::Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| GovSyncError::InvalidAddress(format!("{value}: {e}")))
}
