//! Utility functions for Voty

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
