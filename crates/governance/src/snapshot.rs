//! Point-in-time snapshot handles keyed by coin type

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::{GovernanceError, GovernanceResult};

/// Integer tag of a chain or namespace (SLIP-44 style)
pub type CoinType = u32;

/// Well-known coin types
pub mod coin_types {
    use super::CoinType;

    /// Ethereum mainnet
    pub const ETH: CoinType = 60;
    /// Arweave, used for permalink snapshots
    pub const AR: CoinType = 472;
    /// Polygon
    pub const MATIC: CoinType = 966;
    /// BNB smart chain
    pub const BSC: CoinType = 9006;
}

/// Opaque point-in-time handle (a block height or equivalent)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotHandle(String);

impl SnapshotHandle {
    /// Wrap a handle
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The handle as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotHandle {
    fn from(handle: &str) -> Self {
        Self::new(handle)
    }
}

impl From<u64> for SnapshotHandle {
    fn from(height: u64) -> Self {
        Self(height.to_string())
    }
}

/// Interface for resolving the current snapshot of a coin type
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotResolver: Send + Sync {
    /// Resolve the snapshot handle to pin evaluations of `coin_type` to
    async fn resolve_snapshot(&self, coin_type: CoinType) -> anyhow::Result<SnapshotHandle>;
}

/// Immutable mapping from coin type to snapshot handle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotSet(BTreeMap<CoinType, SnapshotHandle>);

impl SnapshotSet {
    /// Build a snapshot set from `(coin_type, handle)` pairs
    pub fn new(entries: impl IntoIterator<Item = (CoinType, SnapshotHandle)>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Resolve every coin type in one batch, at most `concurrency` at a time
    pub async fn resolve<R>(
        resolver: &R,
        coin_types: &BTreeSet<CoinType>,
        concurrency: usize,
    ) -> GovernanceResult<Self>
    where
        R: SnapshotResolver + ?Sized,
    {
        debug!(count = coin_types.len(), "resolving snapshots");
        let results: Vec<(CoinType, anyhow::Result<SnapshotHandle>)> =
            stream::iter(coin_types.iter().copied())
                .map(|coin_type| async move {
                    (coin_type, resolver.resolve_snapshot(coin_type).await)
                })
                .buffered(concurrency.max(1))
                .collect()
                .await;

        let mut entries = BTreeMap::new();
        for (coin_type, result) in results {
            let handle = result.map_err(|e| GovernanceError::Resolution {
                capability: format!("snapshot:{}", coin_type),
                did: String::new(),
                message: e.to_string(),
            })?;
            entries.insert(coin_type, handle);
        }
        Ok(Self(entries))
    }

    /// Handle for a coin type, if present
    pub fn get(&self, coin_type: CoinType) -> Option<&SnapshotHandle> {
        self.0.get(&coin_type)
    }

    /// Handle for a coin type, failing when the caller did not supply it
    pub fn require(&self, coin_type: CoinType) -> GovernanceResult<&SnapshotHandle> {
        self.get(coin_type)
            .ok_or(GovernanceError::MissingSnapshot { coin_type })
    }

    /// Coin types this set covers
    pub fn coin_types(&self) -> BTreeSet<CoinType> {
        self.0.keys().copied().collect()
    }

    /// Whether every required coin type has a handle
    pub fn covers(&self, required: &BTreeSet<CoinType>) -> bool {
        required.iter().all(|coin_type| self.0.contains_key(coin_type))
    }

    /// Number of handles
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no handles
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(CoinType, SnapshotHandle)> for SnapshotSet {
    fn from_iter<I: IntoIterator<Item = (CoinType, SnapshotHandle)>>(iter: I) -> Self {
        Self::new(iter)
    }
}
