//! Idempotent persistence of delegation state
//!
//! Layout inside the [`StateStore`]:
//!
//! | key | kind | content |
//! |-----|------|---------|
//! | `delegation:state` | hash | `token:powerType:delegator` -> [`DelegationRecord`] |
//! | `delegator:{address}` | scalar | [`DelegatorSummary`] |
//! | `active_delegators:{delegatee}` | scalar | [`ActiveDelegatorSet`] |
//! | `last_analyzed_block:{token}` | scalar | per-token cursor |
//! | `delegation:last_synced_block` | scalar | global cursor |
//! | `delegation:failed_ranges` | hash | `token:from:to` -> error text |

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::codec;
use super::scanner::ChunkRange;
use super::types::address_hex;
use super::types::record_field;
use super::types::ActiveDelegatorSet;
use super::types::DelegationRecord;
use super::types::DelegatorSummary;
use super::types::PowerType;
use super::types::TokenDescriptor;
use crate::config::parse_address;
use crate::store::StateStore;
use crate::Result;

pub const RECORDS_KEY: &str = "delegation:state";
pub const GLOBAL_CURSOR_KEY: &str = "delegation:last_synced_block";
pub const LOCK_KEY: &str = "delegation:processing_lock";
pub const FAILED_RANGES_KEY: &str = "delegation:failed_ranges";

#[must_use]
pub fn summary_key(delegator: &Address) -> String {
    format!("delegator:{}", address_hex(delegator))
}

#[must_use]
pub fn active_set_key(delegatee: &Address) -> String {
    format!("active_delegators:{}", address_hex(delegatee))
}

#[must_use]
pub fn cursor_key(token: &Address) -> String {
    format!("last_analyzed_block:{}", address_hex(token))
}

/// Expiries applied to derived and cursor keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTtls {
    pub cursor: Duration,
    pub summary: Duration,
    pub active_set: Duration,
}

impl Default for StoreTtls {
    fn default() -> Self {
        let week = Duration::from_secs(7 * 24 * 3600);
        Self {
            cursor: week,
            summary: week,
            active_set: week,
        }
    }
}

/// A chunk that could not be scanned, kept for a later pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FailedRange {
    pub token: Address,
    pub from_block: u64,
    pub to_block: u64,
}

impl FailedRange {
    #[must_use]
    pub const fn new(token: Address, range: ChunkRange) -> Self {
        Self {
            token,
            from_block: range.from,
            to_block: range.to,
        }
    }

    #[must_use]
    pub const fn range(&self) -> ChunkRange {
        ChunkRange {
            from: self.from_block,
            to: self.to_block,
        }
    }

    fn field(&self) -> String {
        format!(
            "{}:{}:{}",
            address_hex(&self.token),
            self.from_block,
            self.to_block
        )
    }

    fn parse_field(field: &str) -> Option<Self> {
        let mut parts = field.split(':');
        let token = parse_address(parts.next()?).ok()?;
        let from_block = parts.next()?.parse().ok()?;
        let to_block = parts.next()?.parse().ok()?;
        if parts.next().is_some() || from_block > to_block {
            return None;
        }
        Some(Self {
            token,
            from_block,
            to_block,
        })
    }
}

pub struct StateAdapter {
    store: Arc<dyn StateStore>,
    delegatee: Address,
    tokens: Vec<TokenDescriptor>,
    ttls: StoreTtls,
}

impl StateAdapter {
    pub fn new(
        store: Arc<dyn StateStore>,
        delegatee: Address,
        tokens: Vec<TokenDescriptor>,
        ttls: StoreTtls,
    ) -> Self {
        Self {
            store,
            delegatee,
            tokens,
            ttls,
        }
    }

    #[must_use]
    pub const fn delegatee(&self) -> Address {
        self.delegatee
    }

    #[must_use]
    pub fn tokens(&self) -> &[TokenDescriptor] {
        &self.tokens
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    // ---- delegation records ----

    pub async fn upsert_record(&self, record: &DelegationRecord) -> Result<()> {
        let payload = codec::encode(record)?;
        self.store
            .hash_set(RECORDS_KEY, &record.field_key(), &payload)
            .await
    }

    pub async fn delete_record(
        &self,
        token: Address,
        power_type: PowerType,
        delegator: Address,
    ) -> Result<()> {
        self.store
            .hash_delete(RECORDS_KEY, &record_field(token, power_type, delegator))
            .await
    }

    /// A corrupt stored record reads as absent
    pub async fn get_record(
        &self,
        token: Address,
        power_type: PowerType,
        delegator: Address,
    ) -> Result<Option<DelegationRecord>> {
        let field = record_field(token, power_type, delegator);
        let Some(raw) = self.store.hash_get(RECORDS_KEY, &field).await? else {
            return Ok(None);
        };
        match codec::decode::<DelegationRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring unreadable delegation record {}: {}", field, e);
                Ok(None)
            }
        }
    }

    pub async fn record_exists(
        &self,
        token: Address,
        power_type: PowerType,
        delegator: Address,
    ) -> Result<bool> {
        self.store
            .hash_field_exists(RECORDS_KEY, &record_field(token, power_type, delegator))
            .await
    }

    /// Every decodable record; corrupt entries are skipped
    pub async fn all_records(&self) -> Result<Vec<DelegationRecord>> {
        let entries = self.store.hash_get_all(RECORDS_KEY).await?;
        let mut records = Vec::with_capacity(entries.len());
        for (field, raw) in entries {
            match codec::decode::<DelegationRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Error parsing delegation record {}: {}", field, e),
            }
        }
        records.sort_by(|a, b| a.field_key().cmp(&b.field_key()));
        Ok(records)
    }

    /// Live records of one delegator across all configured tokens and power types
    pub async fn records_for_delegator(&self, delegator: Address) -> Result<Vec<DelegationRecord>> {
        let mut records = Vec::new();
        for token in &self.tokens {
            for power_type in PowerType::ALL {
                if let Some(record) = self.get_record(token.address, power_type, delegator).await? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Whether `delegator` holds any record to the target with a positive balance
    pub async fn has_active_record(&self, delegator: Address) -> Result<bool> {
        Ok(self
            .records_for_delegator(delegator)
            .await?
            .iter()
            .any(|r| r.delegatee == self.delegatee && r.has_positive_balance()))
    }

    // ---- delegator summaries ----

    /// Rewrite or remove the summary from the delegator's current records
    pub async fn rebuild_summary(&self, delegator: Address) -> Result<Option<DelegatorSummary>> {
        let records = self.records_for_delegator(delegator).await?;
        let key = summary_key(&delegator);
        match DelegatorSummary::from_records(delegator, &records) {
            Some(summary) => {
                self.store
                    .set(&key, &codec::encode(&summary)?, Some(self.ttls.summary))
                    .await?;
                Ok(Some(summary))
            }
            None => {
                self.store.delete(&key).await?;
                debug!("Removed summary for {:#x}", delegator);
                Ok(None)
            }
        }
    }

    /// Cached summary, rebuilt on miss or corruption
    pub async fn get_summary(&self, delegator: Address) -> Result<Option<DelegatorSummary>> {
        if let Some(raw) = self.store.get(&summary_key(&delegator)).await? {
            match codec::decode::<DelegatorSummary>(&raw) {
                Ok(summary) => return Ok(Some(summary)),
                Err(e) => warn!("Rebuilding corrupt summary for {:#x}: {}", delegator, e),
            }
        }
        self.rebuild_summary(delegator).await
    }

    // ---- cursors ----

    pub async fn get_cursor(&self, token: Address) -> Result<Option<u64>> {
        self.read_block(&cursor_key(&token)).await
    }

    /// Never moves a cursor backwards; returns the stored value
    pub async fn set_cursor(&self, token: Address, block: u64) -> Result<u64> {
        let key = cursor_key(&token);
        let block = match self.read_block(&key).await? {
            Some(existing) if existing > block => existing,
            _ => block,
        };
        self.store
            .set(&key, &block.to_string(), Some(self.ttls.cursor))
            .await?;
        Ok(block)
    }

    pub async fn global_cursor(&self) -> Result<Option<u64>> {
        self.read_block(GLOBAL_CURSOR_KEY).await
    }

    pub async fn set_global_cursor(&self, block: u64) -> Result<u64> {
        let block = match self.global_cursor().await? {
            Some(existing) if existing > block => existing,
            _ => block,
        };
        self.store
            .set(GLOBAL_CURSOR_KEY, &block.to_string(), None)
            .await?;
        Ok(block)
    }

    async fn read_block(&self, key: &str) -> Result<Option<u64>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match raw.trim().parse::<u64>() {
            Ok(block) => Ok(Some(block)),
            Err(_) => {
                warn!("Ignoring unparsable block number {:?} at {}", raw, key);
                Ok(None)
            }
        }
    }

    // ---- active delegator set ----

    /// Cache the set; an empty set is never written. Returns whether a write happened.
    pub async fn set_active_set(&self, delegators: BTreeSet<Address>) -> Result<bool> {
        if delegators.is_empty() {
            debug!("Not caching an empty active delegator set");
            return Ok(false);
        }
        let set = ActiveDelegatorSet {
            delegatee: self.delegatee,
            delegators,
        };
        self.store
            .set(
                &active_set_key(&self.delegatee),
                &codec::encode(&set)?,
                Some(self.ttls.active_set),
            )
            .await?;
        Ok(true)
    }

    /// Drop the cached set so the next read rebuilds it from records
    pub async fn invalidate_active_set(&self) -> Result<()> {
        self.store.delete(&active_set_key(&self.delegatee)).await
    }

    /// Cached set only; `None` on miss or corruption
    pub async fn get_active_set(&self) -> Result<Option<ActiveDelegatorSet>> {
        let Some(raw) = self.store.get(&active_set_key(&self.delegatee)).await? else {
            return Ok(None);
        };
        match codec::decode::<ActiveDelegatorSet>(&raw) {
            Ok(set) if set.delegatee == self.delegatee => Ok(Some(set)),
            Ok(_) => {
                warn!("Active delegator cache belongs to another delegatee");
                Ok(None)
            }
            Err(e) => {
                warn!("Error parsing active delegators cache: {}", e);
                Ok(None)
            }
        }
    }

    /// Scan every record for delegators with a positive balance to the target
    pub async fn rebuild_active_set(&self) -> Result<ActiveDelegatorSet> {
        let delegators = self
            .all_records()
            .await?
            .into_iter()
            .filter(|r| r.delegatee == self.delegatee && r.has_positive_balance())
            .map(|r| r.delegator)
            .collect();
        Ok(ActiveDelegatorSet {
            delegatee: self.delegatee,
            delegators,
        })
    }

    /// Cache-or-rebuild; a rebuilt set is written back when non-empty
    pub async fn load_active_set(&self) -> Result<ActiveDelegatorSet> {
        if let Some(set) = self.get_active_set().await? {
            return Ok(set);
        }
        let set = self.rebuild_active_set().await?;
        debug!("Rebuilt active delegator set: {} addresses", set.len());
        self.set_active_set(set.delegators.clone()).await?;
        Ok(set)
    }

    // ---- failed-range ledger ----

    pub async fn record_failed_range(&self, failed: FailedRange, error: &str) -> Result<()> {
        self.store
            .hash_set(FAILED_RANGES_KEY, &failed.field(), error)
            .await
    }

    pub async fn clear_failed_range(&self, failed: FailedRange) -> Result<()> {
        self.store
            .hash_delete(FAILED_RANGES_KEY, &failed.field())
            .await
    }

    /// Pending ranges, optionally for one token, in ascending block order
    pub async fn failed_ranges(&self, token: Option<Address>) -> Result<Vec<FailedRange>> {
        let entries = self.store.hash_get_all(FAILED_RANGES_KEY).await?;
        let mut ranges: Vec<FailedRange> = entries
            .keys()
            .filter_map(|field| {
                let parsed = FailedRange::parse_field(field);
                if parsed.is_none() {
                    warn!("Ignoring malformed failed-range entry {}", field);
                }
                parsed
            })
            .filter(|r| token.map_or(true, |t| r.token == t))
            .collect();
        ranges.sort_by_key(|r| (r.from_block, r.to_block, r.token));
        Ok(ranges)
    }
}
