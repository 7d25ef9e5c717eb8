//! `govsync` - incremental governance delegation sync
//!
//! Keeps a queryable snapshot of who currently delegates governance power
//! to one target address, per token and per power type. Each run scans only
//! blocks past the stored cursors and re-reads live chain state for every
//! delegator an event mentions.
//!
//! # Quick Start
//!
//! Create `config.toml` from `config.example.toml`:
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [chain]
//! rpc_urls = ["https://eth-mainnet.example/v2/KEY"]
//!
//! [redis]
//! url = "redis://127.0.0.1:6379"
//! ```
//!
//! ```rust,no_run
//! use govsync::{AppConfig, GovSync};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let govsync = GovSync::new(&config).await?;
//!
//!     govsync.sync_delegations(None).await?;
//!     let stats = govsync.compute_stats().await?;
//!     println!("{} active delegators", stats.total_active_delegators);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`sync`]: scanner, reconciler, state adapter, orchestrator, statistics
//! - [`store`]: Redis and in-memory state stores
//! - [`config`]: TOML configuration with environment overrides
//! - [`cli`]: command-line interface

pub mod cli;
pub mod config;
pub mod errors;
pub mod logging;
pub mod store;
pub mod sync;

#[cfg(test)]
pub mod tests;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use config::AppConfig;
pub use errors::GovSyncError;
pub use errors::Result;
use ethers::types::Address;
use store::RedisStore;
use store::StateStore;
use sync::ActiveDelegatorSet;
use sync::AggregationBuilder;
use sync::DelegationStats;
use sync::DelegatorDirectory;
use sync::DelegatorSummary;
use sync::ReaderPool;
use sync::ReconcileOutcome;
use sync::RetryPolicy;
use sync::StateAdapter;
use sync::StoreTtls;
use sync::SyncOptions;
use sync::SyncOrchestrator;
use sync::SyncOutcome;
use sync::SyncStatus;
use tracing::info;

/// Main client wiring configuration, store, and chain readers together
pub struct GovSync {
    config: AppConfig,
    orchestrator: SyncOrchestrator,
    stats: AggregationBuilder,
}

impl GovSync {
    /// Connect to Redis and the configured RPC endpoints
    ///
    /// # Errors
    /// Returns `ConfigError` for invalid configuration and `Store` if Redis is unreachable
    pub async fn new(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let store = RedisStore::connect(&config.redis)?;
        store.ping().await?;
        info!("Connected to Redis state store");

        let readers = ReaderPool::from_urls(config.rpc_urls())?;
        info!("Using {} RPC endpoint(s)", readers.len());

        Self::with_components(config, Arc::new(store), readers)
    }

    /// Build from an existing store and reader pool
    ///
    /// # Errors
    /// Returns `ConfigError` or `InvalidAddress` for invalid configuration
    pub fn with_components(
        config: &AppConfig,
        store: Arc<dyn StateStore>,
        readers: ReaderPool,
    ) -> Result<Self> {
        let retry = RetryPolicy::new(config.sync.retry_max_attempts, config.retry_base_delay());
        let adapter = Arc::new(StateAdapter::new(
            store,
            config.delegatee()?,
            config.token_descriptors()?,
            StoreTtls {
                cursor: config.cursor_ttl(),
                summary: config.summary_ttl(),
                active_set: config.active_set_ttl(),
            },
        ));

        let options = SyncOptions {
            chunk_size: config.chunk_size(),
            bootstrap_block: config.sync.bootstrap_block,
            retry,
            retry_failed_ranges: config.sync.retry_failed_ranges,
            lock_ttl: config.lock_ttl(),
        };

        Ok(Self {
            config: config.clone(),
            orchestrator: SyncOrchestrator::new(readers.clone(), adapter.clone(), options),
            stats: AggregationBuilder::new(readers, adapter, retry),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Run one incremental sync
    ///
    /// # Errors
    /// Lock, chain-head, and cursor persistence failures
    pub async fn sync_delegations(&self, from_block: Option<u64>) -> Result<SyncOutcome> {
        self.orchestrator.sync_delegations(from_block).await
    }

    /// Re-read one delegator on every token
    ///
    /// # Errors
    /// Store failures while updating the active set
    pub async fn refresh_single_delegator(
        &self,
        delegator: Address,
    ) -> Result<Vec<(String, ReconcileOutcome)>> {
        self.orchestrator.refresh_single_delegator(delegator).await
    }

    pub async fn active_delegators(&self) -> Result<ActiveDelegatorSet> {
        self.orchestrator.active_delegators().await
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        self.orchestrator.sync_status().await
    }

    pub async fn compute_stats(&self) -> Result<DelegationStats> {
        self.stats.compute_stats().await
    }

    pub async fn delegator_directory(&self, limit: usize) -> Result<DelegatorDirectory> {
        self.stats.delegator_directory(limit).await
    }

    pub async fn delegator_summary(&self, delegator: Address) -> Result<Option<DelegatorSummary>> {
        self.stats.delegator_summary(delegator).await
    }

    /// Poll until `shutdown` resolves; returns the number of runs started
    pub async fn watch<S>(&self, interval: Duration, shutdown: S) -> Result<usize>
    where
        S: Future<Output = ()>,
    {
        self.orchestrator.watch(interval, shutdown).await
    }
}
