//! Eligibility and voting-power expression trees
//!
//! Rules arrive in a JSON wire format ([`RawExpression`]) where combinators
//! carry an operator name and leaves carry a function name plus an untyped
//! argument list. Parsing resolves every name against a [`CapabilityRegistry`]
//! and decodes every argument list, so an evaluated tree can no longer hit an
//! unknown function or a malformed argument.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::capability::{BooleanCapability, CapabilityRegistry, DecimalCapability};
use crate::{GovernanceError, GovernanceResult};

/// Wire format shared by both expression kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawExpression {
    /// Operator applied to operands
    Combinator {
        /// Operator name, case-insensitive
        operator: String,
        /// Operands in authored order
        operands: Vec<RawExpression>,
    },
    /// Registered function applied to arguments
    Predicate {
        /// Function name
        function: String,
        /// Untyped arguments
        #[serde(default)]
        arguments: Vec<Value>,
    },
}

impl RawExpression {
    /// Parse the wire format from a JSON string
    pub fn from_json(json: &str) -> GovernanceResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            GovernanceError::MalformedExpression(format!("invalid expression JSON: {}", e))
        })
    }
}

/// Options controlling expression construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Accept `not` with several operands, keeping only the first
    pub lenient_not: bool,
}

/// Boolean combinators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BooleanOperator {
    And,
    Or,
    Not,
}

impl BooleanOperator {
    fn parse(operator: &str) -> GovernanceResult<Self> {
        match operator.to_ascii_lowercase().as_str() {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            "not" => Ok(Self::Not),
            _ => Err(GovernanceError::UnsupportedOperator(operator.to_string())),
        }
    }
}

/// Eligibility rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BooleanExpression {
    /// True iff every operand is true
    And(Vec<BooleanExpression>),
    /// True iff at least one operand is true
    Or(Vec<BooleanExpression>),
    /// Negation of the operand
    Not(Box<BooleanExpression>),
    /// Capability leaf
    Predicate(BooleanCapability),
}

impl BooleanExpression {
    /// Build a typed tree from the wire format
    pub fn parse(
        raw: &RawExpression,
        registry: &CapabilityRegistry,
        options: ParseOptions,
    ) -> GovernanceResult<Self> {
        match raw {
            RawExpression::Predicate {
                function,
                arguments,
            } => Ok(Self::Predicate(registry.decode_boolean(function, arguments)?)),
            RawExpression::Combinator { operator, operands } => {
                match BooleanOperator::parse(operator)? {
                    BooleanOperator::And => Ok(Self::And(Self::parse_all(
                        operands, registry, options,
                    )?)),
                    BooleanOperator::Or => Ok(Self::Or(Self::parse_all(
                        operands, registry, options,
                    )?)),
                    BooleanOperator::Not => {
                        let first = match operands.len() {
                            0 => {
                                return Err(GovernanceError::MalformedExpression(
                                    "not requires an operand".to_string(),
                                ))
                            }
                            1 => &operands[0],
                            n if options.lenient_not => {
                                warn!(ignored = n - 1, "dropping extra operands of not");
                                &operands[0]
                            }
                            n => {
                                return Err(GovernanceError::MalformedExpression(format!(
                                    "not takes exactly one operand, got {}",
                                    n
                                )))
                            }
                        };
                        Ok(Self::Not(Box::new(Self::parse(first, registry, options)?)))
                    }
                }
            }
        }
    }

    fn parse_all(
        operands: &[RawExpression],
        registry: &CapabilityRegistry,
        options: ParseOptions,
    ) -> GovernanceResult<Vec<Self>> {
        operands
            .iter()
            .map(|operand| Self::parse(operand, registry, options))
            .collect()
    }

    /// Parse a JSON rule with the given registry
    pub fn from_json(
        json: &str,
        registry: &CapabilityRegistry,
        options: ParseOptions,
    ) -> GovernanceResult<Self> {
        Self::parse(&RawExpression::from_json(json)?, registry, options)
    }

    /// Convert back into the wire format
    pub fn to_raw(&self) -> RawExpression {
        let combinator = |operator: &str, operands: Vec<RawExpression>| {
            RawExpression::Combinator {
                operator: operator.to_string(),
                operands,
            }
        };
        match self {
            Self::And(operands) => combinator("and", operands.iter().map(Self::to_raw).collect()),
            Self::Or(operands) => combinator("or", operands.iter().map(Self::to_raw).collect()),
            Self::Not(operand) => combinator("not", vec![operand.to_raw()]),
            Self::Predicate(capability) => RawExpression::Predicate {
                function: capability.name().to_string(),
                arguments: capability.arguments(),
            },
        }
    }

    /// Height of the tree; a leaf has depth 1
    pub fn depth(&self) -> usize {
        match self {
            Self::And(operands) | Self::Or(operands) => {
                1 + operands.iter().map(Self::depth).max().unwrap_or(0)
            }
            Self::Not(operand) => 1 + operand.depth(),
            Self::Predicate(_) => 1,
        }
    }

    /// Number of capability leaves
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::And(operands) | Self::Or(operands) => {
                operands.iter().map(Self::leaf_count).sum()
            }
            Self::Not(operand) => operand.leaf_count(),
            Self::Predicate(_) => 1,
        }
    }
}

/// Voting-power rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecimalExpression {
    /// Sum of operand amounts
    Sum(Vec<DecimalExpression>),
    /// Capability leaf
    Weight(DecimalCapability),
}

impl DecimalExpression {
    /// Build a typed tree from the wire format
    pub fn parse(raw: &RawExpression, registry: &CapabilityRegistry) -> GovernanceResult<Self> {
        match raw {
            RawExpression::Predicate {
                function,
                arguments,
            } => Ok(Self::Weight(registry.decode_decimal(function, arguments)?)),
            RawExpression::Combinator { operator, operands } => {
                if !operator.eq_ignore_ascii_case("sum") {
                    return Err(GovernanceError::UnsupportedOperator(operator.to_string()));
                }
                Ok(Self::Sum(
                    operands
                        .iter()
                        .map(|operand| Self::parse(operand, registry))
                        .collect::<GovernanceResult<_>>()?,
                ))
            }
        }
    }

    /// Parse a JSON rule with the given registry
    pub fn from_json(json: &str, registry: &CapabilityRegistry) -> GovernanceResult<Self> {
        Self::parse(&RawExpression::from_json(json)?, registry)
    }

    /// Convert back into the wire format
    pub fn to_raw(&self) -> RawExpression {
        match self {
            Self::Sum(operands) => RawExpression::Combinator {
                operator: "sum".to_string(),
                operands: operands.iter().map(Self::to_raw).collect(),
            },
            Self::Weight(capability) => RawExpression::Predicate {
                function: capability.name().to_string(),
                arguments: capability.arguments(),
            },
        }
    }

    /// Height of the tree; a leaf has depth 1
    pub fn depth(&self) -> usize {
        match self {
            Self::Sum(operands) => 1 + operands.iter().map(Self::depth).max().unwrap_or(0),
            Self::Weight(_) => 1,
        }
    }

    /// Number of capability leaves
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Sum(operands) => operands.iter().map(Self::leaf_count).sum(),
            Self::Weight(_) => 1,
        }
    }
}
