//! Chunked `DelegateChanged` log scanning
//!
//! A `[from, to]` interval is split at `from + k * chunk_size` (capped at
//! `to`): the first chunk is `[from, from + chunk_size]` and every later one
//! is `[end + 1, next boundary]`, queried in ascending order. A chunk that still fails after retries is reported as
//! [`ChunkOutcome::Failed`] and the scan moves on.

use std::sync::Arc;

use ethers::types::Address;
use tracing::debug;
use tracing::error;

use super::client::ChainReader;
use super::retry::RetryPolicy;
use super::types::DelegateChangedEvent;
use super::types::TokenDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    pub from: u64,
    pub to: u64,
}

impl std::fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Lazy chunk boundaries over an inclusive block interval
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    next_from: Option<u64>,
    next_boundary: u64,
    to_block: u64,
    chunk_size: u64,
}

impl Iterator for ChunkPlan {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        let from = self.next_from?;
        if from > self.to_block {
            self.next_from = None;
            return None;
        }
        let to = self.next_boundary.min(self.to_block).max(from);
        self.next_boundary = self.next_boundary.saturating_add(self.chunk_size);
        self.next_from = to.checked_add(1);
        Some(ChunkRange { from, to })
    }
}

#[must_use]
pub fn plan_chunks(from_block: u64, to_block: u64, chunk_size: u64) -> ChunkPlan {
    ChunkPlan {
        next_from: Some(from_block),
        next_boundary: from_block.saturating_add(chunk_size),
        to_block,
        chunk_size,
    }
}

#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Scanned {
        range: ChunkRange,
        events: Vec<DelegateChangedEvent>,
    },
    Failed {
        range: ChunkRange,
        error: String,
    },
}

impl ChunkOutcome {
    #[must_use]
    pub const fn range(&self) -> ChunkRange {
        match self {
            Self::Scanned { range, .. } | Self::Failed { range, .. } => *range,
        }
    }
}

pub struct BlockRangeScanner {
    reader: Arc<dyn ChainReader>,
    delegatee: Address,
    chunk_size: u64,
    retry: RetryPolicy,
}

impl BlockRangeScanner {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        delegatee: Address,
        chunk_size: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            reader,
            delegatee,
            chunk_size,
            retry,
        }
    }

    /// Start (or restart) a scan of `token` over `[from_block, to_block]`
    #[must_use]
    pub fn scan<'a>(
        &'a self,
        token: &'a TokenDescriptor,
        from_block: u64,
        to_block: u64,
    ) -> TokenScan<'a> {
        TokenScan {
            scanner: self,
            token,
            plan: plan_chunks(from_block, to_block, self.chunk_size),
        }
    }

    /// Query one chunk with retries
    pub async fn fetch_chunk(&self, token: &TokenDescriptor, range: ChunkRange) -> ChunkOutcome {
        let label = format!("{} logs {}", token.symbol, range);
        let fetched = self
            .retry
            .run(&label, || {
                self.reader
                    .delegate_changed_events(token, self.delegatee, range.from, range.to)
            })
            .await;

        match fetched {
            Ok(events) => {
                let events: Vec<DelegateChangedEvent> = events
                    .into_iter()
                    .filter(|e| {
                        let keep = e.block_number >= range.from
                            && e.block_number <= range.to
                            && e.delegatee == self.delegatee;
                        if !keep {
                            debug!(
                                "Dropping out-of-filter log for {:#x} at block {}",
                                e.delegator, e.block_number
                            );
                        }
                        keep
                    })
                    .collect();
                debug!(
                    "{} blocks {}: {} delegate events",
                    token.symbol,
                    range,
                    events.len()
                );
                ChunkOutcome::Scanned { range, events }
            }
            Err(e) => {
                error!(
                    "Error processing blocks {} for {}: {}",
                    range, token.symbol, e
                );
                ChunkOutcome::Failed {
                    range,
                    error: e.to_string(),
                }
            }
        }
    }
}

/// In-progress scan of one token; yields chunks in ascending block order
pub struct TokenScan<'a> {
    scanner: &'a BlockRangeScanner,
    token: &'a TokenDescriptor,
    plan: ChunkPlan,
}

impl TokenScan<'_> {
    pub async fn next_chunk(&mut self) -> Option<ChunkOutcome> {
        let range = self.plan.next()?;
        Some(self.scanner.fetch_chunk(self.token, range).await)
    }

    /// First block not yet handed out, for resuming elsewhere
    #[must_use]
    pub fn resume_point(&self) -> Option<u64> {
        self.plan
            .next_from
            .filter(|from| *from <= self.plan.to_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
        plan_chunks(from, to, size).map(|r| (r.from, r.to)).collect()
    }

    #[test]
    fn test_chunk_boundaries_from_genesis() {
        assert_eq!(
            ranges(100, 1000, 400),
            vec![(100, 500), (501, 900), (901, 1000)]
        );
    }

    #[test]
    fn test_chunk_ends_stay_on_multiples_of_chunk_size() {
        assert_eq!(
            ranges(0, 1000, 400),
            vec![(0, 400), (401, 800), (801, 1000)]
        );
        assert_eq!(
            ranges(100, 1300, 400),
            vec![(100, 500), (501, 900), (901, 1300)]
        );
        assert_eq!(ranges(100, 900, 400), vec![(100, 500), (501, 900)]);
    }

    #[test]
    fn test_chunks_do_not_overlap() {
        let plan: Vec<ChunkRange> = plan_chunks(7, 5000, 333).collect();
        for pair in plan.windows(2) {
            assert_eq!(pair[1].from, pair[0].to + 1);
        }
        assert_eq!(plan.first().map(|r| r.from), Some(7));
        assert_eq!(plan.last().map(|r| r.to), Some(5000));
    }

    #[test]
    fn test_single_block_and_empty_ranges() {
        assert_eq!(ranges(1000, 1000, 400), vec![(1000, 1000)]);
        assert!(ranges(1001, 1000, 400).is_empty());
    }

    #[test]
    fn test_plan_near_u64_max_terminates() {
        let plan: Vec<ChunkRange> = plan_chunks(u64::MAX - 1, u64::MAX, 400).collect();
        assert_eq!(
            plan,
            vec![ChunkRange {
                from: u64::MAX - 1,
                to: u64::MAX
            }]
        );
    }
}
