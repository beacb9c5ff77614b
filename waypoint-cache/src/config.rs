use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds of a [`ResponseCache`](crate::ResponseCache).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum age of an entry that can still be returned (e.g. "5m", "30s").
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum number of stored entries.
    pub max_entries: usize,
    /// Drop already-expired entries when the storage is first opened.
    pub sweep_on_init: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            max_entries: 100,
            sweep_on_init: true,
        }
    }
}
