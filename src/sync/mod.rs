//! Delegation synchronization
//!
//! Scans governance token logs for delegations to the tracked delegatee,
//! reconciles each implicated delegator against live chain state, and keeps
//! the derived snapshot in the state store current.

pub mod client;
pub mod codec;
pub mod lock;
pub mod orchestrator;
pub mod reconciler;
pub mod retry;
pub mod scanner;
pub mod state_adapter;
pub mod stats;
pub mod types;

pub use client::ChainReader;
pub use client::EthersChainReader;
pub use client::ReaderPool;
pub use lock::RunState;
pub use lock::SingleFlight;
pub use orchestrator::SyncOptions;
pub use orchestrator::SyncOrchestrator;
pub use orchestrator::SyncOutcome;
pub use orchestrator::SyncReport;
pub use orchestrator::SyncStatus;
pub use reconciler::DelegationReconciler;
pub use reconciler::ReconcileOutcome;
pub use retry::RetryPolicy;
pub use scanner::BlockRangeScanner;
pub use state_adapter::StateAdapter;
pub use state_adapter::StoreTtls;
pub use stats::AggregationBuilder;
pub use stats::DelegationStats;
pub use stats::DelegatorDirectory;
pub use types::*;
