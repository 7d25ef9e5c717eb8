//! Chain reader for governance token contracts
//!
//! [`ChainReader`] is the only surface the sync engine uses to talk to the
//! chain. [`EthersChainReader`] implements it over JSON-RPC; several readers
//! are grouped in a [`ReaderPool`] and handed out round-robin per token.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::Http;
use ethers::providers::Provider;
use ethers::types::Address;
use ethers::types::U256;

use super::types::DelegateChangedEvent;
use super::types::PowerType;
use super::types::TokenDescriptor;
use crate::GovSyncError;
use crate::Result;

abigen!(
    GovernanceToken,
    r#"[
        event DelegateChanged(address indexed delegator, address indexed delegatee, uint8 delegationType)
        function getDelegateeByType(address delegator, uint8 delegationType) external view returns (address)
        function balanceOf(address account) external view returns (uint256)
        function getPowersCurrent(address user) external view returns (uint256, uint256)
    ]"#
);

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current chain head
    async fn block_number(&self) -> Result<u64>;

    /// `DelegateChanged` logs naming `delegatee`, within `[from_block, to_block]`
    async fn delegate_changed_events(
        &self,
        token: &TokenDescriptor,
        delegatee: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DelegateChangedEvent>>;

    /// Current delegate of `delegator` for one power type
    async fn delegatee_by_type(
        &self,
        token: &TokenDescriptor,
        delegator: Address,
        power_type: PowerType,
    ) -> Result<Address>;

    async fn balance_of(&self, token: &TokenDescriptor, account: Address) -> Result<U256>;

    /// Live (voting, proposition) power held by `user`
    async fn powers_current(&self, token: &TokenDescriptor, user: Address) -> Result<(U256, U256)>;
}

/// JSON-RPC chain reader
#[derive(Clone)]
pub struct EthersChainReader {
    provider: Arc<Provider<Http>>,
    endpoint: String,
}

impl EthersChainReader {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| GovSyncError::ConfigError(format!("Invalid RPC URL {rpc_url}: {e}")))?;

        tracing::debug!("Created chain reader for {}", redact_endpoint(rpc_url));

        Ok(Self {
            provider: Arc::new(provider),
            endpoint: redact_endpoint(rpc_url),
        })
    }

    fn contract(&self, token: &TokenDescriptor) -> GovernanceToken<Provider<Http>> {
        GovernanceToken::new(token.address, self.provider.clone())
    }

    /// Endpoint with any API key path segment hidden, for logs
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChainReader for EthersChainReader {
    async fn block_number(&self) -> Result<u64> {
        let height = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| GovSyncError::Chain(format!("eth_blockNumber failed: {e}")))?;
        Ok(height.as_u64())
    }

    async fn delegate_changed_events(
        &self,
        token: &TokenDescriptor,
        delegatee: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DelegateChangedEvent>> {
        let logs = self
            .contract(token)
            .delegate_changed_filter()
            .from_block(from_block)
            .to_block(to_block)
            .topic2(H256::from(delegatee))
            .query_with_meta()
            .await
            .map_err(|e| {
                GovSyncError::Chain(format!(
                    "eth_getLogs {} [{}, {}] failed: {e}",
                    token.symbol, from_block, to_block
                ))
            })?;

        let mut events: Vec<DelegateChangedEvent> = logs
            .into_iter()
            .map(|(log, meta)| DelegateChangedEvent {
                delegator: log.delegator,
                delegatee: log.delegatee,
                delegation_type: log.delegation_type,
                block_number: meta.block_number.as_u64(),
            })
            .collect();
        events.sort_by_key(|e| e.block_number);
        Ok(events)
    }

    async fn delegatee_by_type(
        &self,
        token: &TokenDescriptor,
        delegator: Address,
        power_type: PowerType,
    ) -> Result<Address> {
        self.contract(token)
            .get_delegatee_by_type(delegator, power_type.code())
            .call()
            .await
            .map_err(|e| {
                GovSyncError::Chain(format!(
                    "getDelegateeByType({delegator:#x}, {power_type}) on {} failed: {e}",
                    token.symbol
                ))
            })
    }

    async fn balance_of(&self, token: &TokenDescriptor, account: Address) -> Result<U256> {
        self.contract(token)
            .balance_of(account)
            .call()
            .await
            .map_err(|e| {
                GovSyncError::Chain(format!(
                    "balanceOf({account:#x}) on {} failed: {e}",
                    token.symbol
                ))
            })
    }

    async fn powers_current(&self, token: &TokenDescriptor, user: Address) -> Result<(U256, U256)> {
        self.contract(token)
            .get_powers_current(user)
            .call()
            .await
            .map_err(|e| {
                GovSyncError::Chain(format!(
                    "getPowersCurrent({user:#x}) on {} failed: {e}",
                    token.symbol
                ))
            })
    }
}

/// Fixed set of interchangeable readers; token `i` is served by reader `i % len`
#[derive(Clone)]
pub struct ReaderPool {
    readers: Vec<Arc<dyn ChainReader>>,
}

impl ReaderPool {
    pub fn new(readers: Vec<Arc<dyn ChainReader>>) -> Result<Self> {
        if readers.is_empty() {
            return Err(GovSyncError::ConfigError(
                "at least one chain reader is required".to_string(),
            ));
        }
        Ok(Self { readers })
    }

    /// One JSON-RPC reader per configured endpoint
    pub fn from_urls(urls: &[String]) -> Result<Self> {
        let readers = urls
            .iter()
            .map(|url| EthersChainReader::new(url).map(|r| Arc::new(r) as Arc<dyn ChainReader>))
            .collect::<Result<Vec<_>>>()?;
        Self::new(readers)
    }

    #[must_use]
    pub fn for_token(&self, token_index: usize) -> Arc<dyn ChainReader> {
        self.readers[token_index % self.readers.len()].clone()
    }

    /// Reader used for run-wide reads such as the chain head
    #[must_use]
    pub fn primary(&self) -> Arc<dyn ChainReader> {
        self.readers[0].clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

/// Hide everything after the host, where providers put API keys
fn redact_endpoint(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    match rest.find('/') {
        Some(path_start) if path_start + 1 < rest.len() => {
            format!("{}/****", &url[..scheme_end + 3 + path_start])
        }
        _ => url.to_string(),
    }
}
