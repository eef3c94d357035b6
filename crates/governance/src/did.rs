//! Decentralized identities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label separator of hierarchical identities (`sub.parent.bit`)
pub const SEPARATOR: char = '.';

/// A decentralized identity string.
///
/// Identities are hierarchical by naming only: `alice.dao.bit` is a
/// sub-identity of `dao.bit`. No lookup is involved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Wrap an identity string
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }

    /// The identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identity sits anywhere below `parent` in the naming hierarchy
    pub fn is_sub_did_of(&self, parent: &str) -> bool {
        if parent.is_empty() {
            return false;
        }
        match self.0.strip_suffix(parent) {
            Some(rest) => rest.len() > 1 && rest.ends_with(SEPARATOR),
            None => false,
        }
    }

    /// The identity one level up, if any
    pub fn parent(&self) -> Option<Did> {
        self.0
            .split_once(SEPARATOR)
            .filter(|(label, rest)| !label.is_empty() && !rest.is_empty())
            .map(|(_, rest)| Did(rest.to_string()))
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Did {
    fn from(did: &str) -> Self {
        Self::new(did)
    }
}

impl From<String> for Did {
    fn from(did: String) -> Self {
        Self(did)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
