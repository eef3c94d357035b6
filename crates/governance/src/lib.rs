//! Governance engine for Voty
//!
//! This crate decides who may act in a community and how much weight that
//! action carries. Eligibility and voting-power rules are expression trees whose
//! leaves are typed capabilities evaluated against point-in-time chain snapshots.
//! It also derives the lifecycle phase of time-boxed processes (grants and
//! proposals) and encodes, decodes and tallies ballots.

use thiserror::Error;

pub mod capability;
pub mod choice;
pub mod config;
pub mod did;
pub mod evaluator;
pub mod expression;
pub mod phase;
pub mod requirements;
pub mod snapshot;

// Re-exports
pub use capability::{
    BooleanCapability, CapabilityRegistry, ChainReader, DecimalCapability, StaticChainReader,
    TokenQuery,
};
pub use choice::{Ballot, BallotType, ChoiceTally, Vote};
pub use config::EngineConfig;
pub use did::Did;
pub use evaluator::Evaluator;
pub use expression::{BooleanExpression, DecimalExpression, ParseOptions, RawExpression};
pub use phase::{
    GrantDuration, GrantPhase, Phase, PhaseDuration, PhaseDurations, ProposalDuration,
    ProposalPhase, Timestamp,
};
pub use requirements::RequiredCoinTypes;
pub use snapshot::{CoinType, SnapshotHandle, SnapshotResolver, SnapshotSet};

/// Error types for governance evaluation
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// Expression references a function that is not registered
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Expression uses a combinator outside the supported set
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// Arguments do not decode into the capability's structure
    #[error("Invalid arguments for {function}: {reason}")]
    InvalidArguments {
        /// Function whose arguments were rejected
        function: String,
        /// Why decoding failed
        reason: String,
    },

    /// Structurally invalid expression tree
    #[error("Malformed expression: {0}")]
    MalformedExpression(String),

    /// A leaf needs a snapshot the caller did not supply
    #[error("Missing snapshot for coin type {coin_type}")]
    MissingSnapshot {
        /// Coin type with no snapshot handle
        coin_type: snapshot::CoinType,
    },

    /// An external collaborator failed while resolving a leaf
    #[error("Resolution error in {capability} for {did}: {message}")]
    Resolution {
        /// Capability (or resolver step) that failed
        capability: String,
        /// Identity being evaluated, empty when not identity-bound
        did: String,
        /// Collaborator failure message
        message: String,
    },

    /// Ballot value cannot be decoded for its ballot type
    #[error("Malformed ballot: {0}")]
    MalformedBallot(String),

    /// Power arithmetic left the representable range
    #[error("Arithmetic overflow in {0}")]
    Overflow(String),

    /// Phase duration configuration is unusable
    #[error("Invalid durations: {0}")]
    InvalidDurations(String),

    /// Error from the common layer
    #[error(transparent)]
    Common(#[from] voty_common::Error),
}

/// Result type for governance operations
pub type GovernanceResult<T> = Result<T, GovernanceError>;

impl From<GovernanceError> for voty_common::Error {
    fn from(err: GovernanceError) -> Self {
        match err {
            GovernanceError::Common(inner) => inner,
            GovernanceError::UnknownFunction(name) => {
                voty_common::Error::not_found(format!("function {}", name))
            }
            resolution @ GovernanceError::Resolution { .. } => {
                voty_common::Error::other(resolution.to_string())
            }
            other => voty_common::Error::validation(other.to_string()),
        }
    }
}
