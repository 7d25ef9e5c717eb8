//! Sync orchestration
//!
//! [`SyncOrchestrator::sync_delegations`] drives one run: take the
//! single-flight guard, snapshot the chain head, then for each token in
//! order scan `[from, head]`, reconcile every implicated delegator, and
//! advance the token cursor. The global cursor and the active delegator
//! cache are written after all tokens are done.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use serde::Serialize;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::client::ChainReader;
use super::client::ReaderPool;
use super::lock::RunState;
use super::lock::SingleFlight;
use super::reconciler::DelegationReconciler;
use super::reconciler::ReconcileOutcome;
use super::retry::RetryPolicy;
use super::scanner::BlockRangeScanner;
use super::scanner::ChunkOutcome;
use super::state_adapter::FailedRange;
use super::state_adapter::StateAdapter;
use super::state_adapter::LOCK_KEY;
use super::types::ActiveDelegatorSet;
use super::types::DelegateChangedEvent;
use super::types::TokenDescriptor;
use crate::Result;

/// Tunables for a [`SyncOrchestrator`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub chunk_size: u64,
    /// Start block when neither a token cursor nor a global cursor exists
    pub bootstrap_block: Option<u64>,
    pub retry: RetryPolicy,
    pub retry_failed_ranges: bool,
    pub lock_ttl: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            chunk_size: 400,
            bootstrap_block: None,
            retry: RetryPolicy::default(),
            retry_failed_ranges: true,
            lock_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenSyncReport {
    pub symbol: String,
    pub from_block: u64,
    pub to_block: u64,
    pub chunks_scanned: usize,
    pub chunks_failed: usize,
    pub ranges_recovered: usize,
    pub events_seen: usize,
    pub delegators_reconciled: usize,
    pub reconcile_failures: usize,
    pub active_delegators: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub to_block: u64,
    pub tokens: Vec<TokenSyncReport>,
    pub active_delegators: usize,
    pub active_set_written: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SyncOutcome {
    /// Another run held the guard; nothing was done
    Skipped,
    Completed(SyncReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenCursorStatus {
    pub symbol: String,
    pub address: Address,
    pub genesis_block: u64,
    pub cursor: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub run_state: RunState,
    pub global_cursor: Option<u64>,
    pub tokens: Vec<TokenCursorStatus>,
    pub failed_ranges: Vec<FailedRange>,
}

/// Delegators touched during one run
#[derive(Default)]
struct RunActivity {
    active: BTreeSet<Address>,
    lapsed: BTreeSet<Address>,
}

/// Delegators already reconciled during one token pass
struct TokenPass<'a> {
    token: &'a TokenDescriptor,
    reader: Arc<dyn ChainReader>,
    seen: HashSet<Address>,
    report: TokenSyncReport,
}

/// `max(override ?? cursor ?? global ?? bootstrap ?? genesis, genesis)`
#[must_use]
pub fn resolve_from_block(
    override_block: Option<u64>,
    token_cursor: Option<u64>,
    global_cursor: Option<u64>,
    bootstrap_block: Option<u64>,
    genesis_block: u64,
) -> u64 {
    override_block
        .or(token_cursor)
        .or(global_cursor)
        .or(bootstrap_block)
        .unwrap_or(genesis_block)
        .max(genesis_block)
}

pub struct SyncOrchestrator {
    readers: ReaderPool,
    tokens: Vec<TokenDescriptor>,
    adapter: Arc<StateAdapter>,
    reconciler: DelegationReconciler,
    guard: SingleFlight,
    options: SyncOptions,
}

impl SyncOrchestrator {
    pub fn new(readers: ReaderPool, adapter: Arc<StateAdapter>, options: SyncOptions) -> Self {
        let tokens = adapter.tokens().to_vec();
        let reconciler = DelegationReconciler::new(adapter.clone(), options.retry);
        let guard = SingleFlight::new(adapter.store().clone(), LOCK_KEY, options.lock_ttl);
        Self {
            readers,
            tokens,
            adapter,
            reconciler,
            guard,
            options,
        }
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<StateAdapter> {
        &self.adapter
    }

    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.guard.state()
    }

    /// Run one incremental sync; overlapping calls return [`SyncOutcome::Skipped`]
    pub async fn sync_delegations(&self, from_block: Option<u64>) -> Result<SyncOutcome> {
        let Some(permit) = self.guard.try_acquire().await? else {
            info!("Sync already in progress, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let result = self.run(from_block).await;
        let released = permit.release().await;

        match (result, released) {
            (Ok(report), Ok(())) => Ok(SyncOutcome::Completed(report)),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), released) => {
                if let Err(release_err) = released {
                    error!("Failed to release sync lock: {}", release_err);
                }
                error!("Sync failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run(&self, from_block: Option<u64>) -> Result<SyncReport> {
        let primary = self.readers.primary();
        let to_block = self
            .options
            .retry
            .run("chain head", || primary.block_number())
            .await?;
        let global_cursor = self.adapter.global_cursor().await?;

        info!(
            "Starting delegation sync up to block {} for {} tokens",
            to_block,
            self.tokens.len()
        );

        let mut activity = RunActivity::default();
        let mut reports = Vec::with_capacity(self.tokens.len());
        for (index, token) in self.tokens.iter().enumerate() {
            let report = self
                .sync_token(index, token, from_block, global_cursor, to_block, &mut activity)
                .await?;
            reports.push(report);
        }

        let (snapshot, removed) = self.merge_active_set(&activity).await?;
        let active_delegators = snapshot.len();
        let active_set_written = self.store_active_set(snapshot, removed).await?;
        self.adapter.set_global_cursor(to_block).await?;

        info!(
            "Delegation sync complete at block {}: {} active delegators",
            to_block, active_delegators
        );

        Ok(SyncReport {
            to_block,
            tokens: reports,
            active_delegators,
            active_set_written,
        })
    }

    async fn sync_token(
        &self,
        index: usize,
        token: &TokenDescriptor,
        override_block: Option<u64>,
        global_cursor: Option<u64>,
        to_block: u64,
        activity: &mut RunActivity,
    ) -> Result<TokenSyncReport> {
        let cursor = self.adapter.get_cursor(token.address).await?;
        let from_block = resolve_from_block(
            override_block,
            cursor,
            global_cursor,
            self.options.bootstrap_block,
            token.genesis_block,
        );

        let reader = self.readers.for_token(index);
        let scanner = BlockRangeScanner::new(
            reader.clone(),
            self.adapter.delegatee(),
            self.options.chunk_size,
            self.options.retry,
        );
        let mut pass = TokenPass {
            token,
            reader,
            seen: HashSet::new(),
            report: TokenSyncReport {
                symbol: token.symbol.clone(),
                from_block,
                to_block,
                ..TokenSyncReport::default()
            },
        };

        info!(
            "Syncing {} from block {} to {}",
            token.symbol, from_block, to_block
        );

        if self.options.retry_failed_ranges {
            for failed in self.adapter.failed_ranges(Some(token.address)).await? {
                match scanner.fetch_chunk(token, failed.range()).await {
                    ChunkOutcome::Scanned { events, .. } => {
                        self.process_events(&mut pass, &events, activity).await;
                        self.adapter.clear_failed_range(failed).await?;
                        pass.report.ranges_recovered += 1;
                        info!(
                            "Recovered previously failed range {} for {}",
                            failed.range(),
                            token.symbol
                        );
                    }
                    ChunkOutcome::Failed { range, .. } => {
                        warn!("Range {} for {} is still failing", range, token.symbol);
                    }
                }
            }
        }

        let mut scan = scanner.scan(token, from_block, to_block);
        while let Some(chunk) = scan.next_chunk().await {
            match chunk {
                ChunkOutcome::Scanned { events, .. } => {
                    pass.report.chunks_scanned += 1;
                    self.process_events(&mut pass, &events, activity).await;
                }
                ChunkOutcome::Failed { range, error } => {
                    pass.report.chunks_failed += 1;
                    if self.options.retry_failed_ranges {
                        self.adapter
                            .record_failed_range(FailedRange::new(token.address, range), &error)
                            .await?;
                    }
                }
            }
        }

        let cursor = self.adapter.set_cursor(token.address, to_block).await?;
        info!(
            "{}: {} events, {} delegators reconciled, cursor at {}",
            token.symbol, pass.report.events_seen, pass.report.delegators_reconciled, cursor
        );

        Ok(pass.report)
    }

    async fn process_events(
        &self,
        pass: &mut TokenPass<'_>,
        events: &[DelegateChangedEvent],
        activity: &mut RunActivity,
    ) {
        for event in events {
            pass.report.events_seen += 1;
            // Ground truth is read live, so a second reconcile in the same pass adds nothing
            if !pass.seen.insert(event.delegator) {
                continue;
            }
            let outcome = self
                .reconciler
                .reconcile(pass.reader.as_ref(), pass.token, event.delegator)
                .await;
            pass.report.delegators_reconciled += 1;
            match outcome {
                ReconcileOutcome::Failed => pass.report.reconcile_failures += 1,
                ref o if o.is_active() => {
                    pass.report.active_delegators += 1;
                    activity.active.insert(event.delegator);
                }
                _ => {
                    activity.lapsed.insert(event.delegator);
                }
            }
        }
    }

    /// Previous snapshot, minus delegators left with no active record, plus this run's actives.
    /// The flag is set when a cached delegator was removed.
    async fn merge_active_set(&self, activity: &RunActivity) -> Result<(BTreeSet<Address>, bool)> {
        let mut snapshot = self.adapter.load_active_set().await?.delegators;
        let mut removed = false;
        for delegator in activity.lapsed.difference(&activity.active) {
            if !self.adapter.has_active_record(*delegator).await? {
                removed |= snapshot.remove(delegator);
            }
        }
        snapshot.extend(activity.active.iter().copied());
        Ok((snapshot, removed))
    }

    /// Write the snapshot, or drop the cache when removals emptied it
    async fn store_active_set(&self, snapshot: BTreeSet<Address>, removed: bool) -> Result<bool> {
        if snapshot.is_empty() && removed {
            info!("Last active delegator revoked; clearing active delegator cache");
            self.adapter.invalidate_active_set().await?;
            return Ok(false);
        }
        self.adapter.set_active_set(snapshot).await
    }

    /// Reconcile one address on every token, outside the single-flight guard
    pub async fn refresh_single_delegator(
        &self,
        delegator: Address,
    ) -> Result<Vec<(String, ReconcileOutcome)>> {
        info!("Refreshing delegation status for {:#x}", delegator);

        let mut outcomes = Vec::with_capacity(self.tokens.len());
        for (index, token) in self.tokens.iter().enumerate() {
            let reader = self.readers.for_token(index);
            let outcome = self
                .reconciler
                .reconcile(reader.as_ref(), token, delegator)
                .await;
            outcomes.push((token.symbol.clone(), outcome));
        }

        if outcomes.iter().all(|(_, o)| !o.is_failed()) {
            if let Some(cached) = self.adapter.get_active_set().await? {
                let mut delegators = cached.delegators;
                let mut removed = false;
                if self.adapter.has_active_record(delegator).await? {
                    delegators.insert(delegator);
                } else {
                    removed = delegators.remove(&delegator);
                }
                self.store_active_set(delegators, removed).await?;
            }
        }

        Ok(outcomes)
    }

    pub async fn active_delegators(&self) -> Result<ActiveDelegatorSet> {
        self.adapter.load_active_set().await
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        let mut tokens = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            tokens.push(TokenCursorStatus {
                symbol: token.symbol.clone(),
                address: token.address,
                genesis_block: token.genesis_block,
                cursor: self.adapter.get_cursor(token.address).await?,
            });
        }

        Ok(SyncStatus {
            run_state: self.run_state(),
            global_cursor: self.adapter.global_cursor().await?,
            tokens,
            failed_ranges: self.adapter.failed_ranges(None).await?,
        })
    }

    /// Sync every `interval` until `shutdown` resolves; run failures are logged
    pub async fn watch<S>(&self, interval: Duration, shutdown: S) -> Result<usize>
    where
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut runs = 0;
        info!("Watching for delegation changes every {:?}", interval);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Stopping watch after {} runs", runs);
                    return Ok(runs);
                }
                _ = ticker.tick() => {
                    runs += 1;
                    match self.sync_delegations(None).await {
                        Ok(SyncOutcome::Completed(report)) => info!(
                            "Watch run {} synced to block {}",
                            runs, report.to_block
                        ),
                        Ok(SyncOutcome::Skipped) => info!("Watch run {} skipped", runs),
                        Err(e) => error!("Watch run {} failed: {}", runs, e),
                    }
                }
            }
        }
    }
}
