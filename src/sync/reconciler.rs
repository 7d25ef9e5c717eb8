//! Delegation status reconciliation
//!
//! An event only signals that a delegator may have changed; the record is
//! always derived from a fresh read of the delegator's current delegates and
//! balance. A failed read leaves existing records untouched.

use std::sync::Arc;

use ethers::types::Address;
use ethers::types::U256;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::client::ChainReader;
use super::retry::RetryPolicy;
use super::state_adapter::StateAdapter;
use super::types::format_balance;
use super::types::DelegationRecord;
use super::types::PowerType;
use super::types::TokenDescriptor;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// At least one power type currently points at the target
    Delegated {
        power_types: Vec<PowerType>,
        balance: U256,
    },
    /// Neither power type points at the target; any records were removed
    NotDelegated,
    /// Reads failed and nothing was written, or a write failed part way
    /// (the writes that landed are logged; the next reconcile converges)
    Failed,
}

impl ReconcileOutcome {
    #[must_use]
    pub fn has_live_record(&self) -> bool {
        matches!(self, Self::Delegated { .. })
    }

    /// Counts towards the active delegator set
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Delegated { balance, .. } if !balance.is_zero())
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

struct ChainSnapshot {
    block: u64,
    voting_delegate: Address,
    proposition_delegate: Address,
    balance: U256,
}

impl ChainSnapshot {
    const fn delegate(&self, power_type: PowerType) -> Address {
        match power_type {
            PowerType::Voting => self.voting_delegate,
            PowerType::Proposition => self.proposition_delegate,
        }
    }
}

pub struct DelegationReconciler {
    adapter: Arc<StateAdapter>,
    retry: RetryPolicy,
}

impl DelegationReconciler {
    pub fn new(adapter: Arc<StateAdapter>, retry: RetryPolicy) -> Self {
        Self { adapter, retry }
    }

    /// Re-read `delegator`'s status on `token` and make the stored records match it
    pub async fn reconcile(
        &self,
        reader: &dyn ChainReader,
        token: &TokenDescriptor,
        delegator: Address,
    ) -> ReconcileOutcome {
        let snapshot = match self.read_chain(reader, token, delegator).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(
                    "Error updating delegation status for {:#x} on {}: {}",
                    delegator, token.symbol, e
                );
                return ReconcileOutcome::Failed;
            }
        };

        if !snapshot.balance.is_zero() {
            self.log_target_power(reader, token).await;
        }

        let mut landed = Vec::new();
        match self.apply(token, delegator, &snapshot, &mut landed).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "Error persisting delegation status for {:#x} on {}: {}",
                    delegator, token.symbol, e
                );
                if !landed.is_empty() {
                    warn!(
                        "Partially applied status for {:#x} on {}: {}",
                        delegator,
                        token.symbol,
                        landed.join(", ")
                    );
                }
                ReconcileOutcome::Failed
            }
        }
    }

    async fn read_chain(
        &self,
        reader: &dyn ChainReader,
        token: &TokenDescriptor,
        delegator: Address,
    ) -> Result<ChainSnapshot> {
        let who = format!("{delegator:#x} on {}", token.symbol);
        let voting_label = format!("voting delegate of {who}");
        let proposition_label = format!("proposition delegate of {who}");
        let balance_label = format!("balance of {who}");

        let (block, voting_delegate, proposition_delegate, balance) = tokio::try_join!(
            self.retry.run("block number", || reader.block_number()),
            self.retry.run(&voting_label, || {
                reader.delegatee_by_type(token, delegator, PowerType::Voting)
            }),
            self.retry.run(&proposition_label, || {
                reader.delegatee_by_type(token, delegator, PowerType::Proposition)
            }),
            self.retry
                .run(&balance_label, || reader.balance_of(token, delegator)),
        )?;

        Ok(ChainSnapshot {
            block,
            voting_delegate,
            proposition_delegate,
            balance,
        })
    }

    async fn apply(
        &self,
        token: &TokenDescriptor,
        delegator: Address,
        snapshot: &ChainSnapshot,
        landed: &mut Vec<String>,
    ) -> Result<ReconcileOutcome> {
        let target = self.adapter.delegatee();
        let balance = format_balance(snapshot.balance);
        let observed_at = chrono::Utc::now().timestamp_millis();
        let mut live = Vec::new();

        for power_type in PowerType::ALL {
            // Address equality is on raw bytes, so letter case never matters
            if snapshot.delegate(power_type) == target {
                let record = DelegationRecord {
                    delegator,
                    delegatee: target,
                    power_type,
                    token: token.address,
                    token_symbol: token.symbol.clone(),
                    balance: balance.clone(),
                    as_of_block: snapshot.block,
                    observed_at,
                };
                self.adapter.upsert_record(&record).await?;
                landed.push(format!("upserted {power_type:?}"));
                live.push(power_type);
            } else {
                self.adapter
                    .delete_record(token.address, power_type, delegator)
                    .await?;
                landed.push(format!("deleted {power_type:?}"));
            }
        }

        self.adapter.rebuild_summary(delegator).await?;

        if live.is_empty() {
            debug!(
                "{:#x} no longer delegates {} to the target",
                delegator, token.symbol
            );
            return Ok(ReconcileOutcome::NotDelegated);
        }

        info!(
            "{:#x} delegates {:?} of {} {} to the target",
            delegator, live, balance, token.symbol
        );
        Ok(ReconcileOutcome::Delegated {
            power_types: live,
            balance: snapshot.balance,
        })
    }

    /// Display-only read of the target's live power; failures are logged and ignored
    async fn log_target_power(&self, reader: &dyn ChainReader, token: &TokenDescriptor) {
        let target = self.adapter.delegatee();
        match reader.powers_current(token, target).await {
            Ok((voting, proposition)) => debug!(
                "Target power on {}: voting {}, proposition {}",
                token.symbol,
                format_balance(voting),
                format_balance(proposition)
            ),
            Err(e) => debug!("Could not read target power on {}: {}", token.symbol, e),
        }
    }
}
