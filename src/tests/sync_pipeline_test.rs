//! End-to-end sync runs against the fake chain and the in-memory store

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::store::StateStore;
use crate::sync::state_adapter::FailedRange;
use crate::sync::state_adapter::StateAdapter;
use crate::sync::state_adapter::LOCK_KEY;
use crate::sync::ReconcileOutcome;
use crate::sync::RunState;
use crate::sync::SyncOutcome;
use crate::sync::SyncReport;

fn adapter(h: &Harness) -> &Arc<StateAdapter> {
    h.govsync.orchestrator().adapter()
}

async fn completed(h: &Harness, from_block: Option<u64>) -> SyncReport {
    match h.govsync.sync_delegations(from_block).await.unwrap() {
        SyncOutcome::Completed(report) => report,
        SyncOutcome::Skipped => panic!("sync unexpectedly skipped"),
    }
}

/// (field, balance, block) for every stored record
async fn record_snapshot(h: &Harness) -> Vec<(String, String, u64)> {
    adapter(h)
        .all_records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.field_key(), r.balance, r.as_of_block))
        .collect()
}

#[tokio::test]
async fn test_scans_in_provider_sized_chunks_from_genesis() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);

    let report = completed(&h, None).await;

    assert_eq!(
        h.chain.log_queries(),
        vec![
            (t1.address, 100, 500),
            (t1.address, 501, 900),
            (t1.address, 901, 1000)
        ]
    );
    assert_eq!(report.tokens[0].chunks_scanned, 3);
    assert_eq!(adapter(&h).get_cursor(t1.address).await.unwrap(), Some(1000));
    assert_eq!(adapter(&h).global_cursor().await.unwrap(), Some(1000));
}

#[tokio::test]
async fn test_voting_delegation_creates_single_record() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    let a = addr(0xA);
    h.chain.add_event(&t1, a, 250);
    h.chain.set_delegate(&t1, a, PowerType::Voting, target());
    h.chain
        .set_delegate(&t1, a, PowerType::Proposition, other_delegatee());
    h.chain.set_balance(&t1, a, tokens(5));

    let report = completed(&h, None).await;
    assert_eq!(report.tokens[0].events_seen, 1);
    assert_eq!(report.tokens[0].active_delegators, 1);

    let voting = adapter(&h)
        .get_record(t1.address, PowerType::Voting, a)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(voting.balance, "5.0");
    assert_eq!(voting.delegatee, target());
    assert_eq!(voting.token_symbol, "T1");
    assert_eq!(voting.as_of_block, 1000);
    assert!(adapter(&h)
        .get_record(t1.address, PowerType::Proposition, a)
        .await
        .unwrap()
        .is_none());

    let summary = h.govsync.delegator_summary(a).await.unwrap().unwrap();
    assert_eq!(summary.delegations.len(), 1);
    assert!(h.govsync.active_delegators().await.unwrap().contains(&a));
}

#[tokio::test]
async fn test_revoked_delegation_is_removed() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    let a = addr(0xA);
    let b = addr(0xB);
    h.chain.add_event(&t1, a, 200);
    h.chain.set_delegate(&t1, a, PowerType::Voting, target());
    h.chain.set_balance(&t1, a, tokens(5));
    h.chain.add_event(&t1, b, 300);
    h.chain.delegate_all(&t1, b, target(), tokens(1));
    completed(&h, None).await;
    assert_eq!(h.govsync.active_delegators().await.unwrap().len(), 2);

    // A moves voting power elsewhere after block 1000
    h.chain.set_delegate(&t1, a, PowerType::Voting, other_delegatee());
    h.chain.add_event(&t1, a, 1200);
    h.chain.set_head(1500);
    completed(&h, None).await;

    assert!(adapter(&h)
        .get_record(t1.address, PowerType::Voting, a)
        .await
        .unwrap()
        .is_none());
    assert!(h
        .store
        .get(&crate::sync::state_adapter::summary_key(&a))
        .await
        .unwrap()
        .is_none());
    let active = h.govsync.active_delegators().await.unwrap();
    assert!(!active.contains(&a));
    assert!(active.contains(&b));
    assert!(!adapter(&h).rebuild_active_set().await.unwrap().contains(&a));
}

#[tokio::test]
async fn test_last_delegator_revoking_clears_active_set() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    let a = addr(0xA);
    h.chain.add_event(&t1, a, 200);
    h.chain.delegate_all(&t1, a, target(), tokens(3));
    let report = completed(&h, None).await;
    assert!(report.active_set_written);

    h.chain.delegate_all(&t1, a, other_delegatee(), tokens(3));
    h.chain.add_event(&t1, a, 1100);
    h.chain.set_head(1500);
    let report = completed(&h, None).await;

    assert_eq!(report.active_delegators, 0);
    assert!(!report.active_set_written);
    assert!(record_snapshot(&h).await.is_empty());
    assert!(h
        .store
        .get(&crate::sync::state_adapter::active_set_key(&target()))
        .await
        .unwrap()
        .is_none());
    assert!(h.govsync.active_delegators().await.unwrap().is_empty());

    let stats = h.govsync.compute_stats().await.unwrap();
    assert_eq!(stats.total_active_delegators, 0);
    assert_eq!(stats.token_stats["T1"].delegators, 0);
}

#[tokio::test]
async fn test_refresh_of_last_delegator_clears_active_set() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    let a = addr(0xA);
    h.chain.add_event(&t1, a, 200);
    h.chain.delegate_all(&t1, a, target(), tokens(3));
    completed(&h, None).await;
    assert!(h.govsync.active_delegators().await.unwrap().contains(&a));

    h.chain.delegate_all(&t1, a, other_delegatee(), tokens(3));
    h.govsync.refresh_single_delegator(a).await.unwrap();

    assert!(adapter(&h).get_active_set().await.unwrap().is_none());
    assert!(h.govsync.active_delegators().await.unwrap().is_empty());
    assert_eq!(h.govsync.compute_stats().await.unwrap().total_active_delegators, 0);
}

#[tokio::test]
async fn test_live_state_wins_over_event_payload() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    let a = addr(0xA);
    // The log says A delegated to the target, but A has since moved on
    h.chain.add_event(&t1, a, 400);
    h.chain.delegate_all(&t1, a, other_delegatee(), tokens(3));

    completed(&h, None).await;

    assert!(adapter(&h).all_records().await.unwrap().is_empty());
    assert!(h.govsync.delegator_summary(a).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rerun_over_same_range_is_idempotent() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    for (i, n) in [0xA_u64, 0xB, 0xC].into_iter().enumerate() {
        h.chain.add_event(&t1, addr(n), 150 + i as u64 * 300);
        h.chain.delegate_all(&t1, addr(n), target(), tokens(n));
    }

    completed(&h, Some(100)).await;
    let first = record_snapshot(&h).await;
    let cursor = adapter(&h).get_cursor(t1.address).await.unwrap();

    completed(&h, Some(100)).await;
    assert_eq!(record_snapshot(&h).await, first);
    assert_eq!(adapter(&h).get_cursor(t1.address).await.unwrap(), cursor);
    assert_eq!(first.len(), 6);
}

#[tokio::test]
async fn test_cursor_is_monotonic_and_ends_at_head() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    completed(&h, None).await;

    h.chain.set_head(2000);
    completed(&h, None).await;
    assert_eq!(adapter(&h).get_cursor(t1.address).await.unwrap(), Some(2000));

    // An override below the cursor rescans but never moves the cursor back
    h.chain.clear_log_queries();
    completed(&h, Some(100)).await;
    assert_eq!(h.chain.log_queries().first(), Some(&(t1.address, 100, 500)));
    assert_eq!(adapter(&h).get_cursor(t1.address).await.unwrap(), Some(2000));
}

#[tokio::test]
async fn test_incremental_run_starts_at_cursor() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    completed(&h, None).await;

    h.chain.set_head(1300);
    h.chain.clear_log_queries();
    let report = completed(&h, None).await;
    assert_eq!(report.tokens[0].from_block, 1000);
    assert_eq!(h.chain.log_queries(), vec![(t1.address, 1000, 1300)]);
}

#[tokio::test]
async fn test_start_block_falls_back_to_global_then_bootstrap() {
    let t1 = token(1, 100);
    let mut config = test_config(&[t1.clone()]);
    config.sync.bootstrap_block = Some(600);
    let h = harness_with(&config, 1000);

    let report = completed(&h, None).await;
    assert_eq!(report.tokens[0].from_block, 600);

    // A token added later starts from the global cursor, not its genesis
    let t2 = token(2, 50);
    let mut config = test_config(&[t1.clone(), t2.clone()]);
    config.sync.bootstrap_block = Some(600);
    let h2 = harness_with(&config, 1200);
    adapter(&h2).set_global_cursor(900).await.unwrap();
    let report = completed(&h2, None).await;
    assert_eq!(report.tokens[1].from_block, 900);
}

#[tokio::test]
async fn test_failed_reconciliation_keeps_existing_records() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    let a = addr(0xA);
    h.chain.add_event(&t1, a, 200);
    h.chain.delegate_all(&t1, a, target(), tokens(5));
    completed(&h, None).await;
    let before = record_snapshot(&h).await;

    // A revokes, but every read of A fails this time
    h.chain.delegate_all(&t1, a, other_delegatee(), tokens(5));
    h.chain.fail_delegator(a);
    h.chain.add_event(&t1, a, 1100);
    h.chain.set_head(1400);
    let report = completed(&h, None).await;

    assert_eq!(report.tokens[0].reconcile_failures, 1);
    assert_eq!(record_snapshot(&h).await, before);
    assert!(h.govsync.active_delegators().await.unwrap().contains(&a));
}

#[tokio::test]
async fn test_failed_chunk_is_recorded_and_recovered() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    let a = addr(0xA);
    h.chain.add_event(&t1, a, 600);
    h.chain.delegate_all(&t1, a, target(), tokens(2));
    h.chain.fail_range(&t1, 501, 900);

    let report = completed(&h, None).await;
    assert_eq!(report.tokens[0].chunks_failed, 1);
    assert!(adapter(&h).all_records().await.unwrap().is_empty());
    assert_eq!(adapter(&h).get_cursor(t1.address).await.unwrap(), Some(1000));
    let pending = adapter(&h).failed_ranges(Some(t1.address)).await.unwrap();
    assert_eq!(
        pending,
        vec![FailedRange {
            token: t1.address,
            from_block: 501,
            to_block: 900
        }]
    );

    h.chain.heal_ranges();
    let report = completed(&h, None).await;
    assert_eq!(report.tokens[0].ranges_recovered, 1);
    assert!(adapter(&h)
        .record_exists(t1.address, PowerType::Voting, a)
        .await
        .unwrap());
    assert!(adapter(&h).failed_ranges(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_chunk_is_lost_when_ledger_disabled() {
    let t1 = token(1, 100);
    let mut config = test_config(&[t1.clone()]);
    config.sync.retry_failed_ranges = false;
    let h = harness_with(&config, 1000);
    let a = addr(0xA);
    h.chain.add_event(&t1, a, 600);
    h.chain.delegate_all(&t1, a, target(), tokens(2));
    h.chain.fail_range(&t1, 501, 900);

    completed(&h, None).await;
    h.chain.heal_ranges();
    completed(&h, None).await;

    assert!(adapter(&h).failed_ranges(None).await.unwrap().is_empty());
    assert!(adapter(&h).all_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_skipped_while_lock_held_elsewhere() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    h.store
        .set(LOCK_KEY, "other-process", Some(Duration::from_secs(300)))
        .await
        .unwrap();

    let outcome = h.govsync.sync_delegations(None).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Skipped);
    assert!(h.chain.log_queries().is_empty());
    assert_eq!(adapter(&h).get_cursor(t1.address).await.unwrap(), None);
    assert_eq!(
        h.store.get(LOCK_KEY).await.unwrap().as_deref(),
        Some("other-process")
    );
}

#[tokio::test]
async fn test_lock_released_after_success_and_failure() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);

    completed(&h, None).await;
    assert!(h.store.get(LOCK_KEY).await.unwrap().is_none());

    h.chain.fail_head(true);
    assert!(matches!(
        h.govsync.sync_delegations(None).await,
        Err(GovSyncError::Chain(_))
    ));
    assert!(h.store.get(LOCK_KEY).await.unwrap().is_none());
    assert_eq!(h.govsync.orchestrator().run_state(), RunState::Idle);

    h.chain.fail_head(false);
    completed(&h, None).await;
}

#[tokio::test]
async fn test_empty_run_keeps_cached_active_set() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    let x = addr(0x77);
    adapter(&h)
        .set_active_set(BTreeSet::from([x]))
        .await
        .unwrap();

    let report = completed(&h, None).await;
    assert_eq!(report.active_delegators, 1);
    assert!(h.govsync.active_delegators().await.unwrap().contains(&x));
}

#[tokio::test]
async fn test_zero_balance_delegator_gets_record_but_is_not_active() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    let a = addr(0xA);
    h.chain.add_event(&t1, a, 200);
    h.chain.delegate_all(&t1, a, target(), U256::zero());

    let report = completed(&h, None).await;
    assert_eq!(report.active_delegators, 0);
    assert!(!report.active_set_written);
    assert!(adapter(&h)
        .record_exists(t1.address, PowerType::Voting, a)
        .await
        .unwrap());
    assert!(h.govsync.active_delegators().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tokens_are_reconciled_independently() {
    let t1 = token(1, 100);
    let t2 = token(2, 300);
    let h = harness(&[t1.clone(), t2.clone()], 1000);
    let a = addr(0xA);
    h.chain.add_event(&t1, a, 200);
    h.chain.add_event(&t2, a, 400);
    h.chain.delegate_all(&t1, a, target(), tokens(1));
    h.chain.set_delegate(&t2, a, PowerType::Proposition, target());
    h.chain.set_balance(&t2, a, tokens(7));

    let report = completed(&h, None).await;
    assert_eq!(report.tokens.len(), 2);
    assert_eq!(report.tokens[1].from_block, 300);

    let summary = h.govsync.delegator_summary(a).await.unwrap().unwrap();
    assert_eq!(summary.delegations.len(), 3);
    assert_eq!(summary.token_balances.get("T2").map(String::as_str), Some("7.0"));
}

#[tokio::test]
async fn test_refresh_single_delegator() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);
    let a = addr(0xA);
    let b = addr(0xB);
    h.chain.add_event(&t1, b, 200);
    h.chain.delegate_all(&t1, b, target(), tokens(1));
    completed(&h, None).await;

    // A delegates without any event being scanned yet
    h.chain.delegate_all(&t1, a, target(), tokens(4));
    let outcomes = h.govsync.refresh_single_delegator(a).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].1.is_active());
    assert!(h.govsync.active_delegators().await.unwrap().contains(&a));

    h.chain.delegate_all(&t1, a, other_delegatee(), tokens(4));
    let outcomes = h.govsync.refresh_single_delegator(a).await.unwrap();
    assert_eq!(outcomes[0].1, ReconcileOutcome::NotDelegated);
    assert!(!h.govsync.active_delegators().await.unwrap().contains(&a));
}

#[tokio::test]
async fn test_sync_status_reports_cursors_and_ledger() {
    let t1 = token(1, 100);
    let t2 = token(2, 100);
    let h = harness(&[t1.clone(), t2.clone()], 1000);
    h.chain.fail_range(&t2, 901, 1000);
    completed(&h, None).await;

    let status = h.govsync.sync_status().await.unwrap();
    assert_eq!(status.run_state, RunState::Idle);
    assert_eq!(status.global_cursor, Some(1000));
    assert!(status.tokens.iter().all(|t| t.cursor == Some(1000)));
    assert_eq!(status.failed_ranges.len(), 1);
    assert_eq!(status.failed_ranges[0].token, t2.address);
}

#[tokio::test]
async fn test_watch_runs_until_shutdown() {
    let t1 = token(1, 100);
    let h = harness(&[t1.clone()], 1000);

    let runs = h
        .govsync
        .watch(
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_millis(35)),
        )
        .await
        .unwrap();

    assert!(runs >= 1);
    assert_eq!(adapter(&h).get_cursor(t1.address).await.unwrap(), Some(1000));
}
