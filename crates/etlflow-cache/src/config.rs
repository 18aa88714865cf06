//! Cache configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sizing and TTLs for the two cache tiers.
///
/// Deserializable from the `cache:` block of a pipeline file; every field
/// has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of entries held in the in-process tier.
    pub l1_max_size: usize,
    /// Default TTL for the in-process tier.
    pub l1_ttl_secs: u64,
    /// Default TTL for the key-value store tier.
    pub l2_ttl_secs: u64,
    /// TTL given to entries copied from the store into memory on a hit.
    pub promotion_ttl_secs: u64,
    /// File-backed store location. `None` keeps the store in process.
    pub sqlite_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_size: 1000,
            l1_ttl_secs: 300,
            l2_ttl_secs: 1800,
            promotion_ttl_secs: 60,
            sqlite_path: None,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_secs)
    }

    #[must_use]
    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_secs)
    }

    #[must_use]
    pub fn promotion_ttl(&self) -> Duration {
        Duration::from_secs(self.promotion_ttl_secs)
    }
}
