//! Multi-layer cache coordinator.
//!
//! Reads go L1 → L2, with L2 hits promoted into L1 under a short TTL. Writes
//! go to both tiers concurrently. A failing tier is logged and treated as a
//! miss or no-op, so callers never see a cache error.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::layer::CacheLayer;
use crate::memory::MemoryLayer;
use crate::remote::RemoteLayer;
use crate::sqlite::SqliteStore;
use crate::stats::{CacheStats, Lookup, StatsCounters};
use crate::store::{InMemoryStore, KeyValueStore};

/// Two-tier cache. Construct once and share via `Arc`.
pub struct MultiLayerCache {
    l1: Box<dyn CacheLayer>,
    l2: Box<dyn CacheLayer>,
    config: CacheConfig,
    stats: StatsCounters,
}

impl MultiLayerCache {
    /// Assemble a cache from explicit tiers.
    #[must_use]
    pub fn new(config: CacheConfig, l1: Box<dyn CacheLayer>, l2: Box<dyn CacheLayer>) -> Self {
        Self {
            l1,
            l2,
            config,
            stats: StatsCounters::default(),
        }
    }

    /// Memory tier in front of `store`.
    #[must_use]
    pub fn with_store(config: CacheConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let l1 = Box::new(MemoryLayer::new(config.l1_max_size));
        let l2 = Box::new(RemoteLayer::new(store));
        Self::new(config, l1, l2)
    }

    /// Build the tiers `config` describes: a [`SqliteStore`] when
    /// `sqlite_path` is set, otherwise an [`InMemoryStore`].
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`](crate::CacheError) if the store file can't be
    /// opened.
    pub fn from_config(config: CacheConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match &config.sqlite_path {
            Some(path) => Arc::new(SqliteStore::open(path)?),
            None => Arc::new(InMemoryStore::new()),
        };
        tracing::debug!(
            l1_max_size = config.l1_max_size,
            shared = config.sqlite_path.is_some(),
            "Cache initialized"
        );
        Ok(Self::with_store(config, store))
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look `key` up in L1, then L2. An L2 hit is copied into L1 with the
    /// promotion TTL.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.l1.get(key).await {
            Ok(Some(value)) => {
                self.stats.record(Lookup::L1Hit);
                return Some(value);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key, layer = self.l1.name(), error = %e, "Cache read failed"),
        }

        match self.l2.get(key).await {
            Ok(Some(value)) => {
                self.stats.record(Lookup::L2Hit);
                if let Err(e) = self
                    .l1
                    .set(key, &value, self.config.promotion_ttl())
                    .await
                {
                    tracing::warn!(key, layer = self.l1.name(), error = %e, "Cache promotion failed");
                }
                Some(value)
            }
            Ok(None) => {
                self.stats.record(Lookup::Miss);
                None
            }
            Err(e) => {
                tracing::warn!(key, layer = self.l2.name(), error = %e, "Cache read failed");
                self.stats.record(Lookup::Miss);
                None
            }
        }
    }

    /// Write to both tiers at once. `None` TTLs fall back to the configured
    /// defaults. Returns `true` if at least one tier accepted the value.
    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        l1_ttl: Option<Duration>,
        l2_ttl: Option<Duration>,
    ) -> bool {
        let l1_ttl = l1_ttl.unwrap_or_else(|| self.config.l1_ttl());
        let l2_ttl = l2_ttl.unwrap_or_else(|| self.config.l2_ttl());
        let (l1, l2) = tokio::join!(
            self.l1.set(key, value, l1_ttl),
            self.l2.set(key, value, l2_ttl)
        );
        self.absorb(key, "Cache write failed", l1, l2).is_some()
    }

    /// Remove `key` from both tiers. Returns `true` if either held it.
    pub async fn delete(&self, key: &str) -> bool {
        let (l1, l2) = tokio::join!(self.l1.delete(key), self.l2.delete(key));
        self.absorb(key, "Cache delete failed", l1, l2)
            .is_some_and(|(a, b)| a || b)
    }

    /// Whether either tier holds a live entry. Does not affect stats.
    pub async fn exists(&self, key: &str) -> bool {
        match self.l1.exists(key).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => tracing::warn!(key, layer = self.l1.name(), error = %e, "Cache exists failed"),
        }
        self.l2.exists(key).await.unwrap_or_else(|e| {
            tracing::warn!(key, layer = self.l2.name(), error = %e, "Cache exists failed");
            false
        })
    }

    /// Delete every key matching the glob `pattern` from L2 and scan it out
    /// of L1. Returns the number of L2 entries removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let removed = match self.l2.invalidate_pattern(pattern).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(pattern, layer = self.l2.name(), error = %e, "Cache invalidation failed");
                0
            }
        };
        let local = match self.l1.invalidate_pattern(pattern).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(pattern, layer = self.l1.name(), error = %e, "Cache invalidation failed");
                0
            }
        };
        tracing::debug!(pattern, removed, local, "Cache pattern invalidated");
        removed
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
            .snapshot(self.l1.entry_count(), self.config.l1_max_size)
    }

    /// Decode a JSON value. Undecodable entries count as misses to the caller
    /// and are logged.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cached value is not valid JSON for the requested type");
                None
            }
        }
    }

    /// Encode `value` as JSON and [`set`](Self::set) it.
    pub async fn set_json<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
        l1_ttl: Option<Duration>,
        l2_ttl: Option<Duration>,
    ) -> bool {
        match serde_json::to_vec(value) {
            Ok(raw) => self.set(key, &raw, l1_ttl, l2_ttl).await,
            Err(e) => {
                tracing::warn!(key, error = %e, "Value could not be encoded for caching");
                false
            }
        }
    }

    /// Close both tiers and log final stats.
    pub async fn shutdown(&self) {
        let (l1, l2) = tokio::join!(self.l1.close(), self.l2.close());
        for (name, result) in [(self.l1.name(), l1), (self.l2.name(), l2)] {
            if let Err(e) = result {
                tracing::warn!(layer = name, error = %e, "Cache shutdown failed");
            }
        }
        let stats = self.stats();
        tracing::info!(
            total_requests = stats.total_requests,
            l1_hit_ratio = stats.l1_hit_ratio,
            l2_hit_ratio = stats.l2_hit_ratio,
            miss_ratio = stats.miss_ratio,
            "Cache shut down"
        );
    }

    /// Log per-tier failures. `None` only when both tiers failed; otherwise
    /// the successful results (failed tier reads as the default).
    fn absorb<T: Default>(
        &self,
        key: &str,
        what: &str,
        l1: Result<T>,
        l2: Result<T>,
    ) -> Option<(T, T)> {
        let failed = l1.is_err() && l2.is_err();
        let l1 = l1.unwrap_or_else(|e| {
            tracing::warn!(key, layer = self.l1.name(), error = %e, "{what}");
            T::default()
        });
        let l2 = l2.unwrap_or_else(|e| {
            tracing::warn!(key, layer = self.l2.name(), error = %e, "{what}");
            T::default()
        });
        (!failed).then_some((l1, l2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(l1_max_size: usize) -> MultiLayerCache {
        MultiLayerCache::with_store(
            CacheConfig {
                l1_max_size,
                ..CacheConfig::default()
            },
            Arc::new(InMemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn set_then_get_is_an_l1_hit() {
        let cache = cache(10);
        assert!(
            cache
                .set("k", b"v", Some(Duration::from_secs(60)), Some(Duration::from_secs(300)))
                .await
        );
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
        let stats = cache.stats();
        assert_eq!((stats.l1_hits, stats.l2_hits, stats.misses), (1, 0, 0));
    }

    #[tokio::test]
    async fn l2_hit_promotes_into_l1() {
        let store = Arc::new(InMemoryStore::new());
        store.setex("k", Duration::from_secs(60), b"v").await.unwrap();
        let cache = MultiLayerCache::with_store(CacheConfig::default(), store);

        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
        assert_eq!(cache.get("nope").await, None);

        let stats = cache.stats();
        assert_eq!((stats.l1_hits, stats.l2_hits, stats.misses), (1, 1, 1));
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.l1_size, Some(1));
    }

    #[tokio::test]
    async fn delete_and_exists_span_both_tiers() {
        let cache = cache(10);
        cache.set("k", b"v", None, None).await;
        assert!(cache.exists("k").await);
        assert!(cache.delete("k").await);
        assert!(!cache.exists("k").await);
        assert!(!cache.delete("k").await);
        assert_eq!(cache.stats().total_requests, 0);
    }

    #[tokio::test]
    async fn json_helpers() {
        let cache = cache(10);
        assert!(cache.set_json("nums", &vec![1, 2, 3], None, None).await);
        assert_eq!(cache.get_json::<Vec<i32>>("nums").await, Some(vec![1, 2, 3]));
        assert_eq!(cache.get_json::<String>("nums").await, None);
    }
}
