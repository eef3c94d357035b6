//! Capability registry
//!
//! Capabilities are the leaves of eligibility and voting-power expressions.
//! The set is closed: each function name maps to a decoder that turns the
//! untyped argument list of the wire format into a typed capability once, at
//! expression construction. Execution goes through a [`ChainReader`], the only
//! place the engine touches external data.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::did::Did;
use crate::snapshot::{CoinType, SnapshotHandle, SnapshotSet};
use crate::{GovernanceError, GovernanceResult};

/// Token standard queried through a [`ChainReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStandard {
    /// Fungible token
    Erc20,
    /// Non-fungible token
    Erc721,
}

/// A token contract on a given chain, optionally narrowed to one token id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenQuery {
    /// Token standard
    pub standard: TokenStandard,
    /// Chain the contract lives on
    pub coin_type: CoinType,
    /// Contract address
    pub contract: String,
    /// Specific token, for non-fungible queries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

/// Interface for the external chain-data collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Whether `did` owns a token matching `query` at `snapshot`
    async fn owns_token(
        &self,
        did: &Did,
        query: &TokenQuery,
        snapshot: &SnapshotHandle,
    ) -> anyhow::Result<bool>;

    /// Token balance of `did` at `snapshot` (token count for non-fungible queries)
    async fn token_balance(
        &self,
        did: &Did,
        query: &TokenQuery,
        snapshot: &SnapshotHandle,
    ) -> anyhow::Result<Decimal>;
}

/// Predicate capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BooleanCapability {
    /// The identity is one of the listed identities
    IsDid {
        /// Accepted identities
        dids: Vec<Did>,
    },
    /// The identity is a sub-identity of one of the listed parents
    IsSubDidOf {
        /// Accepted parents
        parents: Vec<Did>,
    },
    /// The identity owns a non-fungible token
    OwnsErc721 {
        /// Collection and optional token id
        query: TokenQuery,
    },
}

/// Weight capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecimalCapability {
    /// Fixed power for each listed identity
    DidWeight {
        /// Identities granted power
        dids: Vec<Did>,
        /// Power granted
        power: Decimal,
    },
    /// Fixed power for sub-identities of the listed parents
    SubDidWeight {
        /// Parents whose sub-identities are granted power
        parents: Vec<Did>,
        /// Power granted
        power: Decimal,
    },
    /// Fungible token balance
    Erc20Balance {
        /// Token contract
        query: TokenQuery,
    },
    /// Number of non-fungible tokens held
    Erc721Balance {
        /// Collection
        query: TokenQuery,
    },
}

fn resolution_error(capability: &str, did: &Did, err: anyhow::Error) -> GovernanceError {
    GovernanceError::Resolution {
        capability: capability.to_string(),
        did: did.to_string(),
        message: err.to_string(),
    }
}

impl BooleanCapability {
    /// Registered function name
    pub fn name(&self) -> &'static str {
        match self {
            Self::IsDid { .. } => "is_did",
            Self::IsSubDidOf { .. } => "is_sub_did_of",
            Self::OwnsErc721 { .. } => "owns_erc721",
        }
    }

    /// Arguments in wire format
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::IsDid { dids } => vec![dids_value(dids)],
            Self::IsSubDidOf { parents } => vec![dids_value(parents)],
            Self::OwnsErc721 { query } => token_arguments(query),
        }
    }

    /// Evaluate the predicate for `did`
    pub async fn execute(
        &self,
        reader: &dyn ChainReader,
        did: &Did,
        snapshots: &SnapshotSet,
    ) -> GovernanceResult<bool> {
        let result = match self {
            Self::IsDid { dids } => dids.contains(did),
            Self::IsSubDidOf { parents } => {
                parents.iter().any(|parent| did.is_sub_did_of(parent.as_str()))
            }
            Self::OwnsErc721 { query } => {
                let snapshot = snapshots.require(query.coin_type)?;
                reader
                    .owns_token(did, query, snapshot)
                    .await
                    .map_err(|e| resolution_error(self.name(), did, e))?
            }
        };
        debug!(function = self.name(), %did, result, "predicate evaluated");
        Ok(result)
    }
}

impl DecimalCapability {
    /// Registered function name
    pub fn name(&self) -> &'static str {
        match self {
            Self::DidWeight { .. } => "did_weight",
            Self::SubDidWeight { .. } => "sub_did_weight",
            Self::Erc20Balance { .. } => "erc20_balance",
            Self::Erc721Balance { .. } => "erc721_balance",
        }
    }

    /// Arguments in wire format
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::DidWeight { dids, power } => {
                vec![dids_value(dids), Value::String(power.to_string())]
            }
            Self::SubDidWeight { parents, power } => {
                vec![dids_value(parents), Value::String(power.to_string())]
            }
            Self::Erc20Balance { query } | Self::Erc721Balance { query } => {
                token_arguments(query)
            }
        }
    }

    /// Evaluate the weight of `did`; never negative
    pub async fn execute(
        &self,
        reader: &dyn ChainReader,
        did: &Did,
        snapshots: &SnapshotSet,
    ) -> GovernanceResult<Decimal> {
        let amount = match self {
            Self::DidWeight { dids, power } => {
                if dids.contains(did) {
                    *power
                } else {
                    Decimal::ZERO
                }
            }
            Self::SubDidWeight { parents, power } => {
                if parents.iter().any(|parent| did.is_sub_did_of(parent.as_str())) {
                    *power
                } else {
                    Decimal::ZERO
                }
            }
            Self::Erc20Balance { query } | Self::Erc721Balance { query } => {
                let snapshot = snapshots.require(query.coin_type)?;
                reader
                    .token_balance(did, query, snapshot)
                    .await
                    .map_err(|e| resolution_error(self.name(), did, e))?
            }
        };

        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(GovernanceError::Resolution {
                capability: self.name().to_string(),
                did: did.to_string(),
                message: format!("negative amount {}", amount),
            });
        }
        debug!(function = self.name(), %did, %amount, "weight evaluated");
        Ok(amount)
    }
}

fn dids_value(dids: &[Did]) -> Value {
    Value::Array(
        dids.iter()
            .map(|did| Value::String(did.to_string()))
            .collect(),
    )
}

fn token_arguments(query: &TokenQuery) -> Vec<Value> {
    let mut arguments = vec![
        Value::from(query.coin_type),
        Value::String(query.contract.clone()),
    ];
    if let Some(token_id) = &query.token_id {
        arguments.push(Value::String(token_id.clone()));
    }
    arguments
}

fn invalid(function: &str, reason: impl Into<String>) -> GovernanceError {
    GovernanceError::InvalidArguments {
        function: function.to_string(),
        reason: reason.into(),
    }
}

fn expect_arity(
    function: &str,
    arguments: &[Value],
    min: usize,
    max: usize,
) -> GovernanceResult<()> {
    if arguments.len() < min || arguments.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(invalid(
            function,
            format!("expected {} arguments, got {}", expected, arguments.len()),
        ));
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(function: &str, what: &str, value: &Value) -> GovernanceResult<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| invalid(function, format!("{}: {}", what, e)))
}

fn decode_dids(function: &str, value: &Value) -> GovernanceResult<Vec<Did>> {
    let dids: Vec<Did> = decode(function, "identity list", value)?;
    if dids.is_empty() {
        return Err(invalid(function, "identity list is empty"));
    }
    if dids.iter().any(|did| did.as_str().is_empty()) {
        return Err(invalid(function, "identity list contains an empty identity"));
    }
    Ok(dids)
}

fn decode_power(function: &str, value: &Value) -> GovernanceResult<Decimal> {
    let power: Decimal = decode(function, "power", value)?;
    if power.is_sign_negative() && !power.is_zero() {
        return Err(invalid(function, format!("power {} is negative", power)));
    }
    Ok(power)
}

fn decode_token(
    function: &str,
    standard: TokenStandard,
    arguments: &[Value],
    allow_token_id: bool,
) -> GovernanceResult<TokenQuery> {
    expect_arity(function, arguments, 2, if allow_token_id { 3 } else { 2 })?;
    let coin_type: CoinType = decode(function, "coin type", &arguments[0])?;
    let contract: String = decode(function, "contract", &arguments[1])?;
    if contract.trim().is_empty() {
        return Err(invalid(function, "contract is empty"));
    }
    let token_id = match arguments.get(2) {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        Some(other) => return Err(invalid(function, format!("token id: unexpected {}", other))),
    };
    Ok(TokenQuery {
        standard,
        coin_type,
        contract,
        token_id,
    })
}

/// Decode `is_did([dids])`
pub fn decode_is_did(arguments: &[Value]) -> GovernanceResult<BooleanCapability> {
    expect_arity("is_did", arguments, 1, 1)?;
    Ok(BooleanCapability::IsDid {
        dids: decode_dids("is_did", &arguments[0])?,
    })
}

/// Decode `is_sub_did_of([parents])`
pub fn decode_is_sub_did_of(arguments: &[Value]) -> GovernanceResult<BooleanCapability> {
    expect_arity("is_sub_did_of", arguments, 1, 1)?;
    Ok(BooleanCapability::IsSubDidOf {
        parents: decode_dids("is_sub_did_of", &arguments[0])?,
    })
}

/// Decode `owns_erc721(coin_type, contract, token_id?)`
pub fn decode_owns_erc721(arguments: &[Value]) -> GovernanceResult<BooleanCapability> {
    Ok(BooleanCapability::OwnsErc721 {
        query: decode_token("owns_erc721", TokenStandard::Erc721, arguments, true)?,
    })
}

/// Decode `did_weight([dids], power)`
pub fn decode_did_weight(arguments: &[Value]) -> GovernanceResult<DecimalCapability> {
    expect_arity("did_weight", arguments, 2, 2)?;
    Ok(DecimalCapability::DidWeight {
        dids: decode_dids("did_weight", &arguments[0])?,
        power: decode_power("did_weight", &arguments[1])?,
    })
}

/// Decode `sub_did_weight([parents], power)`
pub fn decode_sub_did_weight(arguments: &[Value]) -> GovernanceResult<DecimalCapability> {
    expect_arity("sub_did_weight", arguments, 2, 2)?;
    Ok(DecimalCapability::SubDidWeight {
        parents: decode_dids("sub_did_weight", &arguments[0])?,
        power: decode_power("sub_did_weight", &arguments[1])?,
    })
}

/// Decode `erc20_balance(coin_type, contract)`
pub fn decode_erc20_balance(arguments: &[Value]) -> GovernanceResult<DecimalCapability> {
    Ok(DecimalCapability::Erc20Balance {
        query: decode_token("erc20_balance", TokenStandard::Erc20, arguments, false)?,
    })
}

/// Decode `erc721_balance(coin_type, contract)`
pub fn decode_erc721_balance(arguments: &[Value]) -> GovernanceResult<DecimalCapability> {
    Ok(DecimalCapability::Erc721Balance {
        query: decode_token("erc721_balance", TokenStandard::Erc721, arguments, false)?,
    })
}

/// Decoder producing a predicate capability
pub type BooleanDecoder = fn(&[Value]) -> GovernanceResult<BooleanCapability>;

/// Decoder producing a weight capability
pub type DecimalDecoder = fn(&[Value]) -> GovernanceResult<DecimalCapability>;

/// Lookup table from function name to capability decoder.
///
/// Built once at startup and shared read-only between evaluations.
#[derive(Clone)]
pub struct CapabilityRegistry {
    boolean: BTreeMap<&'static str, BooleanDecoder>,
    decimal: BTreeMap<&'static str, DecimalDecoder>,
}

impl CapabilityRegistry {
    /// A registry with no functions
    pub fn empty() -> Self {
        Self {
            boolean: BTreeMap::new(),
            decimal: BTreeMap::new(),
        }
    }

    /// The standard function set
    pub fn standard() -> Self {
        Self::empty()
            .with_boolean("is_did", decode_is_did)
            .with_boolean("is_sub_did_of", decode_is_sub_did_of)
            .with_boolean("owns_erc721", decode_owns_erc721)
            .with_decimal("did_weight", decode_did_weight)
            .with_decimal("sub_did_weight", decode_sub_did_weight)
            .with_decimal("erc20_balance", decode_erc20_balance)
            .with_decimal("erc721_balance", decode_erc721_balance)
    }

    /// Register a predicate function
    pub fn with_boolean(mut self, name: &'static str, decoder: BooleanDecoder) -> Self {
        self.boolean.insert(name, decoder);
        self
    }

    /// Register a weight function
    pub fn with_decimal(mut self, name: &'static str, decoder: DecimalDecoder) -> Self {
        self.decimal.insert(name, decoder);
        self
    }

    /// Remove a function of either kind
    pub fn without(mut self, name: &str) -> Self {
        self.boolean.remove(name);
        self.decimal.remove(name);
        self
    }

    /// Look up a predicate decoder
    pub fn lookup_boolean(&self, name: &str) -> GovernanceResult<BooleanDecoder> {
        self.boolean
            .get(name)
            .copied()
            .ok_or_else(|| GovernanceError::UnknownFunction(name.to_string()))
    }

    /// Look up a weight decoder
    pub fn lookup_decimal(&self, name: &str) -> GovernanceResult<DecimalDecoder> {
        self.decimal
            .get(name)
            .copied()
            .ok_or_else(|| GovernanceError::UnknownFunction(name.to_string()))
    }

    /// Decode a predicate leaf
    pub fn decode_boolean(
        &self,
        name: &str,
        arguments: &[Value],
    ) -> GovernanceResult<BooleanCapability> {
        (self.lookup_boolean(name)?)(arguments)
    }

    /// Decode a weight leaf
    pub fn decode_decimal(
        &self,
        name: &str,
        arguments: &[Value],
    ) -> GovernanceResult<DecimalCapability> {
        (self.lookup_decimal(name)?)(arguments)
    }

    /// Registered predicate names
    pub fn boolean_names(&self) -> Vec<&'static str> {
        self.boolean.keys().copied().collect()
    }

    /// Registered weight names
    pub fn decimal_names(&self) -> Vec<&'static str> {
        self.decimal.keys().copied().collect()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("boolean", &self.boolean_names())
            .field("decimal", &self.decimal_names())
            .finish()
    }
}

/// One token position held by an identity in a [`StaticChainReader`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    /// Holder
    pub did: Did,
    /// Chain
    pub coin_type: CoinType,
    /// Contract address, compared case-insensitively
    pub contract: String,
    /// Non-fungible token ids held
    #[serde(default)]
    pub token_ids: Vec<String>,
    /// Fungible balance
    #[serde(default)]
    pub balance: Decimal,
    /// Snapshot the position is valid at; valid at every snapshot when absent
    #[serde(default)]
    pub snapshot: Option<SnapshotHandle>,
}

impl Holding {
    fn matches(&self, did: &Did, query: &TokenQuery, snapshot: &SnapshotHandle) -> bool {
        &self.did == did
            && self.coin_type == query.coin_type
            && self.contract.eq_ignore_ascii_case(&query.contract)
            && self.snapshot.as_ref().map_or(true, |s| s == snapshot)
    }
}

/// In-memory chain data, loaded from JSON fixtures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticChainReader {
    /// Known positions
    #[serde(default)]
    pub holdings: Vec<Holding>,
}

impl StaticChainReader {
    /// Build a reader from positions
    pub fn new(holdings: Vec<Holding>) -> Self {
        Self { holdings }
    }

    /// Load a reader from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> GovernanceResult<Self> {
        let content = std::fs::read_to_string(path).map_err(voty_common::Error::from)?;
        serde_json::from_str(&content).map_err(|e| {
            voty_common::Error::serialization(format!("Failed to parse chain fixture: {}", e))
                .into()
        })
    }

    fn matching<'a>(
        &'a self,
        did: &'a Did,
        query: &'a TokenQuery,
        snapshot: &'a SnapshotHandle,
    ) -> impl Iterator<Item = &'a Holding> + 'a {
        self.holdings
            .iter()
            .filter(move |holding| holding.matches(did, query, snapshot))
    }
}

#[async_trait]
impl ChainReader for StaticChainReader {
    async fn owns_token(
        &self,
        did: &Did,
        query: &TokenQuery,
        snapshot: &SnapshotHandle,
    ) -> anyhow::Result<bool> {
        Ok(self
            .matching(did, query, snapshot)
            .any(|holding| match &query.token_id {
                Some(id) => holding.token_ids.contains(id),
                None => !holding.token_ids.is_empty() || holding.balance > Decimal::ZERO,
            }))
    }

    async fn token_balance(
        &self,
        did: &Did,
        query: &TokenQuery,
        snapshot: &SnapshotHandle,
    ) -> anyhow::Result<Decimal> {
        Ok(self
            .matching(did, query, snapshot)
            .map(|holding| match query.standard {
                TokenStandard::Erc20 => holding.balance,
                TokenStandard::Erc721 => Decimal::from(holding.token_ids.len()),
            })
            .sum())
    }
}
