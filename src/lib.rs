//! Voty
//!
//! Permission, voting-power and lifecycle evaluation for DAO governance:
//! eligibility and weight rules evaluated against chain snapshots, phase
//! derivation for time-boxed processes, and ballot tallying.

/// Module version information
pub mod version {
    /// The current version of the Voty library
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Shared configuration, errors and logging
pub use voty_common as common;

/// Governance evaluation engine
pub use voty_governance as governance;
