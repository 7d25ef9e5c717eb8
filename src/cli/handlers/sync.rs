//! Synchronization command handlers

use std::time::Duration;

use tracing::info;

use crate::config::parse_address;
use crate::sync::format_balance;
use crate::sync::ReconcileOutcome;
use crate::sync::SyncOutcome;
use crate::GovSync;
use crate::Result;

/// Run one sync and print the per-token report
///
/// # Errors
/// Propagates orchestration failures (lock, chain head, cursor writes)
pub async fn handle_sync_command(govsync: &GovSync, from_block: Option<u64>) -> Result<()> {
    if let Some(block) = from_block {
        info!("Overriding start block: {}", block);
    }

    let start_time = std::time::Instant::now();
    match govsync.sync_delegations(from_block).await? {
        SyncOutcome::Skipped => {
            println!("⏭️  Sync already in progress, nothing to do");
        }
        SyncOutcome::Completed(report) => {
            println!(
                "✅ Synced to block {} in {:?}",
                report.to_block,
                start_time.elapsed()
            );
            println!(
                "{:<10} {:>12} {:>12} {:>8} {:>8} {:>10} {:>8}",
                "token", "from", "to", "chunks", "failed", "reconciled", "active"
            );
            for token in &report.tokens {
                println!(
                    "{:<10} {:>12} {:>12} {:>8} {:>8} {:>10} {:>8}",
                    token.symbol,
                    token.from_block,
                    token.to_block,
                    token.chunks_scanned,
                    token.chunks_failed,
                    token.delegators_reconciled,
                    token.active_delegators
                );
                if token.ranges_recovered > 0 {
                    println!(
                        "   ↻ recovered {} previously failed range(s)",
                        token.ranges_recovered
                    );
                }
            }
            println!("👥 Active delegators: {}", report.active_delegators);
        }
    }
    Ok(())
}

/// Sync on an interval until Ctrl-C
///
/// # Errors
/// Returns an error only if the watch loop itself cannot run
pub async fn handle_watch_command(govsync: &GovSync, interval_secs: Option<u64>) -> Result<()> {
    let interval = interval_secs
        .map_or_else(|| govsync.config().watch_interval(), Duration::from_secs)
        .max(Duration::from_secs(1));

    println!("👀 Watching every {interval:?}, press Ctrl-C to stop");
    let runs = govsync
        .watch(interval, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;
    println!("🛑 Stopped after {runs} run(s)");
    Ok(())
}

/// Reconcile a single delegator across all tokens
///
/// # Errors
/// Returns `InvalidAddress` for a malformed address
pub async fn handle_refresh_command(govsync: &GovSync, address: &str) -> Result<()> {
    let delegator = parse_address(address)?;
    let outcomes = govsync.refresh_single_delegator(delegator).await?;

    println!("🔄 Refreshed {delegator:#x}");
    for (symbol, outcome) in outcomes {
        match outcome {
            ReconcileOutcome::Delegated {
                power_types,
                balance,
            } => {
                let types: Vec<String> = power_types.iter().map(ToString::to_string).collect();
                println!(
                    "  {symbol:<10} delegated {} ({} {symbol})",
                    types.join(" + "),
                    format_balance(balance)
                );
            }
            ReconcileOutcome::NotDelegated => println!("  {symbol:<10} not delegated"),
            ReconcileOutcome::Failed => println!("  {symbol:<10} ⚠️  read failed, state unchanged"),
        }
    }
    Ok(())
}
