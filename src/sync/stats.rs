//! Delegation statistics and dashboard views
//!
//! Counts and balances come from the stored records; the target's aggregate
//! voting and proposition power is always read live from each token.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::Address;
use ethers::types::U256;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::error;

use super::client::ReaderPool;
use super::retry::RetryPolicy;
use super::state_adapter::StateAdapter;
use super::types::format_balance;
use super::types::DelegatorSummary;
use super::types::PowerType;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStats {
    /// Active delegators holding at least one record on this token
    pub delegators: usize,
    pub total_balance: String,
    pub voting_power_delegators: usize,
    pub proposition_power_delegators: usize,
    pub delegatee_voting_power: String,
    pub delegatee_proposition_power: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationStats {
    pub total_active_delegators: usize,
    pub delegatee: Address,
    /// Token symbol -> cursor, 0 when never synced
    pub last_analyzed_blocks: BTreeMap<String, u64>,
    pub token_stats: BTreeMap<String, TokenStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenDelegation {
    pub voting: bool,
    pub proposition: bool,
    pub balance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatorListing {
    pub address: Address,
    pub delegations_by_token: BTreeMap<String, TokenDelegation>,
    /// Sum of balances over every live record
    pub total_votes: String,
    #[serde(skip)]
    total_wei: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatorDirectory {
    pub delegators: Vec<DelegatorListing>,
    pub total: usize,
    pub has_more: bool,
}

pub struct AggregationBuilder {
    readers: ReaderPool,
    adapter: Arc<StateAdapter>,
    retry: RetryPolicy,
}

impl AggregationBuilder {
    pub fn new(readers: ReaderPool, adapter: Arc<StateAdapter>, retry: RetryPolicy) -> Self {
        Self {
            readers,
            adapter,
            retry,
        }
    }

    pub async fn compute_stats(&self) -> Result<DelegationStats> {
        let delegatee = self.adapter.delegatee();
        let tokens = self.adapter.tokens();

        // Live power reads run concurrently while the store is scanned
        let mut power_reads = JoinSet::new();
        for (index, token) in tokens.iter().cloned().enumerate() {
            let reader = self.readers.for_token(index);
            let retry = self.retry;
            power_reads.spawn(async move {
                let label = format!("target power on {}", token.symbol);
                let powers = retry
                    .run(&label, || reader.powers_current(&token, delegatee))
                    .await;
                (token.symbol, powers)
            });
        }

        let active = self.adapter.load_active_set().await?;
        let records = self.adapter.all_records().await?;

        let mut token_stats: BTreeMap<String, TokenStats> = BTreeMap::new();
        let mut last_analyzed_blocks = BTreeMap::new();
        for token in tokens {
            token_stats.insert(
                token.symbol.clone(),
                TokenStats {
                    total_balance: "0.0".to_string(),
                    delegatee_voting_power: "0".to_string(),
                    delegatee_proposition_power: "0".to_string(),
                    ..TokenStats::default()
                },
            );
            let cursor = self.adapter.get_cursor(token.address).await?;
            last_analyzed_blocks.insert(token.symbol.clone(), cursor.unwrap_or(0));
        }

        let mut balances: HashMap<Address, U256> = HashMap::new();
        for record in records
            .iter()
            .filter(|r| r.delegatee == delegatee && r.has_positive_balance())
        {
            let Some(stat) = token_stats.get_mut(&record.token_symbol) else {
                debug!("Record for unconfigured token {}", record.token_symbol);
                continue;
            };
            let sum = balances.entry(record.token).or_default();
            *sum = sum.saturating_add(record.balance_wei());
            match record.power_type {
                PowerType::Voting => stat.voting_power_delegators += 1,
                PowerType::Proposition => stat.proposition_power_delegators += 1,
            }
        }

        for token in tokens {
            let Some(stat) = token_stats.get_mut(&token.symbol) else {
                continue;
            };
            if let Some(sum) = balances.get(&token.address) {
                stat.total_balance = format_balance(*sum);
            }
            let mut delegators = 0;
            for delegator in &active.delegators {
                let has_voting = self
                    .adapter
                    .record_exists(token.address, PowerType::Voting, *delegator)
                    .await?;
                let on_token = has_voting
                    || self
                        .adapter
                        .record_exists(token.address, PowerType::Proposition, *delegator)
                        .await?;
                if on_token {
                    delegators += 1;
                }
            }
            stat.delegators = delegators;
        }

        while let Some(joined) = power_reads.join_next().await {
            let (symbol, powers) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!("Power read task failed: {}", e);
                    continue;
                }
            };
            let Some(stat) = token_stats.get_mut(&symbol) else {
                continue;
            };
            match powers {
                Ok((voting, proposition)) => {
                    stat.delegatee_voting_power = format_balance(voting);
                    stat.delegatee_proposition_power = format_balance(proposition);
                }
                Err(e) => error!("Error getting powers for {}: {}", symbol, e),
            }
        }

        Ok(DelegationStats {
            total_active_delegators: active.len(),
            delegatee,
            last_analyzed_blocks,
            token_stats,
        })
    }

    /// Delegators with live positive records, largest total first
    pub async fn delegator_directory(&self, limit: usize) -> Result<DelegatorDirectory> {
        let delegatee = self.adapter.delegatee();
        let mut grouped: BTreeMap<Address, DelegatorListing> = BTreeMap::new();

        for record in self
            .adapter
            .all_records()
            .await?
            .into_iter()
            .filter(|r| r.delegatee == delegatee && r.has_positive_balance())
        {
            let listing = grouped
                .entry(record.delegator)
                .or_insert_with(|| DelegatorListing {
                    address: record.delegator,
                    delegations_by_token: BTreeMap::new(),
                    total_votes: String::new(),
                    total_wei: U256::zero(),
                });
            let entry = listing
                .delegations_by_token
                .entry(record.token_symbol.clone())
                .or_insert_with(|| TokenDelegation {
                    balance: record.balance.clone(),
                    ..TokenDelegation::default()
                });
            match record.power_type {
                PowerType::Voting => entry.voting = true,
                PowerType::Proposition => entry.proposition = true,
            }
            listing.total_wei = listing.total_wei.saturating_add(record.balance_wei());
        }

        let mut delegators: Vec<DelegatorListing> = grouped
            .into_values()
            .map(|mut listing| {
                listing.total_votes = format_balance(listing.total_wei);
                listing
            })
            .collect();
        delegators.sort_by(|a, b| b.total_wei.cmp(&a.total_wei).then(a.address.cmp(&b.address)));

        let total = delegators.len();
        delegators.truncate(limit);
        Ok(DelegatorDirectory {
            has_more: total > delegators.len(),
            delegators,
            total,
        })
    }

    pub async fn delegator_summary(&self, delegator: Address) -> Result<Option<DelegatorSummary>> {
        self.adapter.get_summary(delegator).await
    }
}
