//! Core data model for delegation tracking

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use ethers::types::Address;
use ethers::types::U256;
use serde::Deserialize;
use serde::Serialize;

/// Token decimals for every tracked governance token
pub const TOKEN_DECIMALS: usize = 18;

/// Governance power types that can be delegated independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerType {
    Voting,
    Proposition,
}

impl PowerType {
    pub const ALL: [Self; 2] = [Self::Voting, Self::Proposition];

    /// On-chain enum value (`GovernancePowerType`)
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Voting => 0,
            Self::Proposition => 1,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Voting),
            1 => Some(Self::Proposition),
            _ => None,
        }
    }
}

impl fmt::Display for PowerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voting => write!(f, "VOTING"),
            Self::Proposition => write!(f, "PROPOSITION"),
        }
    }
}

/// Which nonce getter a token exposes for delegation-by-signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonceFunction {
    /// `nonces(address)`
    Standard,
    /// `_nonces(address)`
    #[default]
    Underscored,
}

impl NonceFunction {
    #[must_use]
    pub const fn method_name(self) -> &'static str {
        match self {
            Self::Standard => "nonces",
            Self::Underscored => "_nonces",
        }
    }
}

/// A tracked governance token, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub symbol: String,
    pub address: Address,
    pub genesis_block: u64,
    #[serde(default)]
    pub nonce_function: NonceFunction,
}

impl TokenDescriptor {
    /// Name of the contract method returning the signing nonce
    #[must_use]
    pub const fn nonce_method(&self) -> &'static str {
        self.nonce_function.method_name()
    }
}

/// A `DelegateChanged` log naming the tracked delegatee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateChangedEvent {
    pub delegator: Address,
    pub delegatee: Address,
    /// Raw `delegationType` argument; informational only
    pub delegation_type: u8,
    pub block_number: u64,
}

/// Canonical fact: `delegator` delegates `power_type` of `token` to `delegatee`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub delegator: Address,
    pub delegatee: Address,
    pub power_type: PowerType,
    pub token: Address,
    pub token_symbol: String,
    /// Balance in whole-token units, e.g. "5.0"
    pub balance: String,
    pub as_of_block: u64,
    /// Unix milliseconds when the chain read happened
    pub observed_at: i64,
}

impl DelegationRecord {
    /// Hash field under which this record is stored
    #[must_use]
    pub fn field_key(&self) -> String {
        record_field(self.token, self.power_type, self.delegator)
    }

    #[must_use]
    pub fn balance_wei(&self) -> U256 {
        parse_balance(&self.balance).unwrap_or_default()
    }

    #[must_use]
    pub fn has_positive_balance(&self) -> bool {
        !self.balance_wei().is_zero()
    }
}

/// Hash field for a record identity `(token, power_type, delegator)`
#[must_use]
pub fn record_field(token: Address, power_type: PowerType, delegator: Address) -> String {
    format!(
        "{}:{}:{}",
        address_hex(&token),
        power_type.code(),
        address_hex(&delegator)
    )
}

/// Full lowercase `0x` hex; `Display` for addresses abbreviates
#[must_use]
pub fn address_hex(address: &Address) -> String {
    format!("{address:#x}")
}

/// One delegation line inside a [`DelegatorSummary`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub token: Address,
    pub token_symbol: String,
    pub power_type: PowerType,
    pub balance: String,
    pub last_updated_block: u64,
}

/// Per-address view derived from its live delegation records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatorSummary {
    pub address: Address,
    pub delegations: Vec<SummaryEntry>,
    /// Token symbol -> balance
    pub token_balances: BTreeMap<String, String>,
}

impl DelegatorSummary {
    /// Build from records; `None` when there is nothing to summarize
    #[must_use]
    pub fn from_records(address: Address, records: &[DelegationRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let delegations = records
            .iter()
            .map(|r| SummaryEntry {
                token: r.token,
                token_symbol: r.token_symbol.clone(),
                power_type: r.power_type,
                balance: r.balance.clone(),
                last_updated_block: r.as_of_block,
            })
            .collect();

        let token_balances = records
            .iter()
            .map(|r| (r.token_symbol.clone(), r.balance.clone()))
            .collect();

        Some(Self {
            address,
            delegations,
            token_balances,
        })
    }
}

/// Cached materialization of addresses actively delegating to the target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveDelegatorSet {
    pub delegatee: Address,
    pub delegators: BTreeSet<Address>,
}

impl ActiveDelegatorSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.delegators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delegators.is_empty()
    }

    #[must_use]
    pub fn contains(&self, address: &Address) -> bool {
        self.delegators.contains(address)
    }
}

/// Format a raw 18-decimal amount as a decimal string, keeping at least one fraction digit
#[must_use]
pub fn format_balance(amount: U256) -> String {
    let divisor = U256::exp10(TOKEN_DECIMALS);
    let whole = amount / divisor;
    let remainder = (amount % divisor).to_string();

    let decimal_part = format!("{remainder:0>width$}", width = TOKEN_DECIMALS);
    let decimal_trimmed = decimal_part.trim_end_matches('0');

    if decimal_trimmed.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{decimal_trimmed}")
    }
}

/// Parse a decimal balance string back into raw units
#[must_use]
pub fn parse_balance(balance: &str) -> Option<U256> {
    ethers::utils::parse_ether(balance.trim()).ok()
}
