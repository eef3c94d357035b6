//! Static coin-type requirement inference
//!
//! Walks a rule without evaluating it and collects every coin type any
//! evaluation could need, so the caller can resolve all snapshots of a rule
//! in one batch before touching a resolver. The result depends only on the
//! shape of the rule, never on the identity or the snapshots.

use std::collections::BTreeSet;

use crate::capability::{BooleanCapability, CapabilityRegistry, DecimalCapability};
use crate::expression::{BooleanExpression, DecimalExpression, ParseOptions, RawExpression};
use crate::snapshot::CoinType;
use crate::GovernanceResult;

/// Anything that can report the snapshots it needs
pub trait RequiredCoinTypes {
    /// Coin types whose snapshots an evaluation could read
    fn required_coin_types(&self) -> BTreeSet<CoinType>;
}

impl RequiredCoinTypes for BooleanCapability {
    fn required_coin_types(&self) -> BTreeSet<CoinType> {
        match self {
            Self::IsDid { .. } | Self::IsSubDidOf { .. } => BTreeSet::new(),
            Self::OwnsErc721 { query } => BTreeSet::from([query.coin_type]),
        }
    }
}

impl RequiredCoinTypes for DecimalCapability {
    fn required_coin_types(&self) -> BTreeSet<CoinType> {
        match self {
            Self::DidWeight { .. } | Self::SubDidWeight { .. } => BTreeSet::new(),
            Self::Erc20Balance { query } | Self::Erc721Balance { query } => {
                BTreeSet::from([query.coin_type])
            }
        }
    }
}

impl RequiredCoinTypes for BooleanExpression {
    fn required_coin_types(&self) -> BTreeSet<CoinType> {
        match self {
            Self::And(operands) | Self::Or(operands) => operands
                .iter()
                .flat_map(|operand| operand.required_coin_types())
                .collect(),
            Self::Not(operand) => operand.required_coin_types(),
            Self::Predicate(capability) => capability.required_coin_types(),
        }
    }
}

impl RequiredCoinTypes for DecimalExpression {
    fn required_coin_types(&self) -> BTreeSet<CoinType> {
        match self {
            Self::Sum(operands) => operands
                .iter()
                .flat_map(|operand| operand.required_coin_types())
                .collect(),
            Self::Weight(capability) => capability.required_coin_types(),
        }
    }
}

/// Requirements of an unparsed eligibility rule
pub fn required_coin_types_of_boolean(
    raw: &RawExpression,
    registry: &CapabilityRegistry,
    options: ParseOptions,
) -> GovernanceResult<BTreeSet<CoinType>> {
    Ok(BooleanExpression::parse(raw, registry, options)?.required_coin_types())
}

/// Requirements of an unparsed voting-power rule
pub fn required_coin_types_of_decimal(
    raw: &RawExpression,
    registry: &CapabilityRegistry,
) -> GovernanceResult<BTreeSet<CoinType>> {
    Ok(DecimalExpression::parse(raw, registry)?.required_coin_types())
}
