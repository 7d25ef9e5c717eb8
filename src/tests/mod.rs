//! Scenario tests for the sync pipeline
//!
//! [`FakeChain`] is a scriptable [`ChainReader`]: tests place events, set
//! each delegator's current delegates and balances, and inject failures.
//! State lives in a [`MemoryStore`], so nothing here needs a network.

pub mod sync_pipeline_test;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::types::Address;
use ethers::types::U256;

use crate::config::AppConfig;
use crate::config::TokenConfig;
use crate::store::MemoryStore;
use crate::sync::ChainReader;
use crate::sync::DelegateChangedEvent;
use crate::sync::NonceFunction;
use crate::sync::PowerType;
use crate::sync::ReaderPool;
use crate::sync::TokenDescriptor;
use crate::GovSync;
use crate::GovSyncError;
use crate::Result;

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

/// The tracked delegatee in every scenario
pub fn target() -> Address {
    addr(0xD0)
}

pub fn other_delegatee() -> Address {
    addr(0xEE)
}

pub fn tokens(n: u64) -> U256 {
    U256::exp10(18) * n
}

pub fn token(n: u64, genesis_block: u64) -> TokenDescriptor {
    TokenDescriptor {
        symbol: format!("T{n}"),
        address: addr(0x1000 + n),
        genesis_block,
        nonce_function: NonceFunction::Underscored,
    }
}

#[derive(Default)]
struct FakeState {
    head: u64,
    events: Vec<(Address, DelegateChangedEvent)>,
    delegates: HashMap<(Address, Address, PowerType), Address>,
    balances: HashMap<(Address, Address), U256>,
    powers: HashMap<Address, (U256, U256)>,
    failing_ranges: HashSet<(Address, u64, u64)>,
    failing_delegators: HashSet<Address>,
    failing_powers: HashSet<Address>,
    fail_head: bool,
    log_queries: Vec<(Address, u64, u64)>,
}

#[derive(Default)]
pub struct FakeChain {
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.set_head(head);
        Arc::new(chain)
    }

    fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_head(&self, head: u64) {
        self.with(|s| s.head = head);
    }

    /// A `DelegateChanged` log naming the target
    pub fn add_event(&self, token: &TokenDescriptor, delegator: Address, block_number: u64) {
        self.with(|s| {
            s.events.push((
                token.address,
                DelegateChangedEvent {
                    delegator,
                    delegatee: target(),
                    delegation_type: 0,
                    block_number,
                },
            ));
        });
    }

    pub fn set_delegate(
        &self,
        token: &TokenDescriptor,
        delegator: Address,
        power_type: PowerType,
        delegate: Address,
    ) {
        self.with(|s| {
            s.delegates
                .insert((token.address, delegator, power_type), delegate);
        });
    }

    /// Delegate both power types and set the balance in one go
    pub fn delegate_all(&self, token: &TokenDescriptor, delegator: Address, to: Address, balance: U256) {
        for power_type in PowerType::ALL {
            self.set_delegate(token, delegator, power_type, to);
        }
        self.set_balance(token, delegator, balance);
    }

    pub fn set_balance(&self, token: &TokenDescriptor, delegator: Address, balance: U256) {
        self.with(|s| {
            s.balances.insert((token.address, delegator), balance);
        });
    }

    pub fn set_powers(&self, token: &TokenDescriptor, voting: U256, proposition: U256) {
        self.with(|s| {
            s.powers.insert(token.address, (voting, proposition));
        });
    }

    pub fn fail_range(&self, token: &TokenDescriptor, from: u64, to: u64) {
        self.with(|s| s.failing_ranges.insert((token.address, from, to)));
    }

    pub fn heal_ranges(&self) {
        self.with(|s| s.failing_ranges.clear());
    }

    pub fn fail_delegator(&self, delegator: Address) {
        self.with(|s| s.failing_delegators.insert(delegator));
    }

    pub fn fail_powers(&self, token: &TokenDescriptor) {
        self.with(|s| s.failing_powers.insert(token.address));
    }

    pub fn fail_head(&self, fail: bool) {
        self.with(|s| s.fail_head = fail);
    }

    pub fn log_queries(&self) -> Vec<(Address, u64, u64)> {
        self.with(|s| s.log_queries.clone())
    }

    pub fn clear_log_queries(&self) {
        self.with(|s| s.log_queries.clear());
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn block_number(&self) -> Result<u64> {
        self.with(|s| {
            if s.fail_head {
                Err(GovSyncError::Chain("head unavailable".to_string()))
            } else {
                Ok(s.head)
            }
        })
    }

    async fn delegate_changed_events(
        &self,
        token: &TokenDescriptor,
        delegatee: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DelegateChangedEvent>> {
        self.with(|s| {
            s.log_queries.push((token.address, from_block, to_block));
            if s.failing_ranges.contains(&(token.address, from_block, to_block)) {
                return Err(GovSyncError::Chain("eth_getLogs timed out".to_string()));
            }
            let mut events: Vec<DelegateChangedEvent> = s
                .events
                .iter()
                .filter(|(t, e)| {
                    *t == token.address
                        && e.delegatee == delegatee
                        && e.block_number >= from_block
                        && e.block_number <= to_block
                })
                .map(|(_, e)| e.clone())
                .collect();
            events.sort_by_key(|e| e.block_number);
            Ok(events)
        })
    }

    async fn delegatee_by_type(
        &self,
        token: &TokenDescriptor,
        delegator: Address,
        power_type: PowerType,
    ) -> Result<Address> {
        self.with(|s| {
            if s.failing_delegators.contains(&delegator) {
                return Err(GovSyncError::Chain("eth_call reverted".to_string()));
            }
            Ok(s.delegates
                .get(&(token.address, delegator, power_type))
                .copied()
                .unwrap_or_default())
        })
    }

    async fn balance_of(&self, token: &TokenDescriptor, account: Address) -> Result<U256> {
        self.with(|s| {
            if s.failing_delegators.contains(&account) {
                return Err(GovSyncError::Chain("eth_call reverted".to_string()));
            }
            Ok(s.balances
                .get(&(token.address, account))
                .copied()
                .unwrap_or_default())
        })
    }

    async fn powers_current(&self, token: &TokenDescriptor, _user: Address) -> Result<(U256, U256)> {
        self.with(|s| {
            if s.failing_powers.contains(&token.address) {
                return Err(GovSyncError::Chain("getPowersCurrent reverted".to_string()));
            }
            Ok(s.powers.get(&token.address).copied().unwrap_or_default())
        })
    }
}

/// Config pointing at the fake target and the given tokens
pub fn test_config(tokens: &[TokenDescriptor]) -> AppConfig {
    let mut config = AppConfig::default();
    config.chain.delegatee = format!("{:#x}", target());
    config.chain.chunk_size = 400;
    config.tokens = tokens
        .iter()
        .map(|t| TokenConfig {
            symbol: t.symbol.clone(),
            address: format!("{:#x}", t.address),
            genesis_block: t.genesis_block,
            nonce_function: t.nonce_function,
        })
        .collect();
    config.sync.bootstrap_block = None;
    config.sync.retry_max_attempts = 2;
    config.sync.retry_base_delay_ms = 0;
    config
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub chain: Arc<FakeChain>,
    pub govsync: GovSync,
}

pub fn harness_with(config: &AppConfig, head: u64) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let chain = FakeChain::new(head);
    let readers = ReaderPool::new(vec![chain.clone() as Arc<dyn ChainReader>]).unwrap();
    let govsync = GovSync::with_components(config, store.clone(), readers).unwrap();
    Harness {
        store,
        chain,
        govsync,
    }
}

pub fn harness(tokens: &[TokenDescriptor], head: u64) -> Harness {
    harness_with(&test_config(tokens), head)
}
