//! Versioned JSON envelopes for values kept in the state store
//!
//! Every stored payload is wrapped as `{"version":1,"kind":"...","data":{...}}`.
//! Anything that does not decode cleanly into the expected kind and version is
//! reported as [`GovSyncError::Codec`], which readers treat as a cache miss.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use super::types::ActiveDelegatorSet;
use super::types::DelegationRecord;
use super::types::DelegatorSummary;
use crate::GovSyncError;
use crate::Result;

pub const SCHEMA_VERSION: u32 = 1;

/// A value type with a stable storage tag
pub trait Stored: Serialize + DeserializeOwned {
    const KIND: &'static str;
}

impl Stored for DelegationRecord {
    const KIND: &'static str = "delegation_record";
}

impl Stored for DelegatorSummary {
    const KIND: &'static str = "delegator_summary";
}

impl Stored for ActiveDelegatorSet {
    const KIND: &'static str = "active_delegator_set";
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    kind: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    kind: String,
    data: serde_json::Value,
}

pub fn encode<T: Stored>(value: &T) -> Result<String> {
    let envelope = EnvelopeRef {
        version: SCHEMA_VERSION,
        kind: T::KIND,
        data: value,
    };
    Ok(serde_json::to_string(&envelope)?)
}

pub fn decode<T: Stored>(raw: &str) -> Result<T> {
    let envelope: Envelope = serde_json::from_str(raw)
        .map_err(|e| GovSyncError::Codec(format!("malformed {} payload: {e}", T::KIND)))?;

    if envelope.kind != T::KIND {
        return Err(GovSyncError::Codec(format!(
            "expected {}, found {}",
            T::KIND,
            envelope.kind
        )));
    }
    if envelope.version != SCHEMA_VERSION {
        return Err(GovSyncError::Codec(format!(
            "unsupported {} version {}",
            T::KIND,
            envelope.version
        )));
    }

    serde_json::from_value(envelope.data)
        .map_err(|e| GovSyncError::Codec(format!("invalid {} data: {e}", T::KIND)))
}
