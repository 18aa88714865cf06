use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etlflow_cache::error::Result;
use etlflow_cache::{
    CacheConfig, CacheError, CacheLayer, InMemoryStore, KeyValueStore, MultiLayerCache,
    RemoteLayer,
};

fn config(l1_max_size: usize) -> CacheConfig {
    CacheConfig {
        l1_max_size,
        ..CacheConfig::default()
    }
}

/// Store that can be switched into a failing mode.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::Task("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }
    async fn setex(&self, key: &str, ttl: Duration, value: &[u8]) -> Result<()> {
        self.check()?;
        self.inner.setex(key, ttl, value).await
    }
    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        self.inner.delete(keys).await
    }
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.keys(pattern).await
    }
    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.exists(key).await
    }
}

#[tokio::test]
async fn evicted_l1_entry_is_still_served_by_l2() {
    let cache = MultiLayerCache::with_store(config(3), Arc::new(InMemoryStore::new()));
    for key in ["A", "B", "C"] {
        assert!(cache.set(key, key.as_bytes(), None, None).await);
    }
    assert_eq!(cache.get("A").await.as_deref(), Some(&b"A"[..]));
    cache.set("D", b"D", None, None).await;

    // B was least recently used, so it now comes from the store.
    assert_eq!(cache.get("B").await.as_deref(), Some(&b"B"[..]));
    let stats = cache.stats();
    assert_eq!(stats.l1_hits, 1);
    assert_eq!(stats.l2_hits, 1);
    assert_eq!(stats.l1_size, Some(3));
}

#[tokio::test(start_paused = true)]
async fn tier_ttls_are_independent() {
    let cache = MultiLayerCache::with_store(config(10), Arc::new(InMemoryStore::new()));
    cache
        .set("k", b"v", Some(Duration::from_secs(60)), Some(Duration::from_secs(300)))
        .await;

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(cache.get("k").await.is_some());
    assert!(cache.get("k").await.is_some());

    // Promotion TTL (60s) lapses; the store entry is still live.
    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(cache.get("k").await.is_some());

    tokio::time::advance(Duration::from_secs(300)).await;
    assert!(cache.get("k").await.is_none());

    let stats = cache.stats();
    assert_eq!((stats.l1_hits, stats.l2_hits, stats.misses), (1, 2, 1));
}

#[tokio::test]
async fn ratios_sum_to_one() {
    let cache = MultiLayerCache::with_store(config(10), Arc::new(InMemoryStore::new()));
    cache.set("a", b"1", None, None).await;
    for key in ["a", "a", "b", "c", "a", "d", "e"] {
        cache.get(key).await;
    }
    let stats = cache.stats();
    assert_eq!(stats.total_requests, 7);
    let sum = stats.l1_hit_ratio + stats.l2_hit_ratio + stats.miss_ratio;
    assert!((sum - 1.0).abs() <= 0.002, "sum was {sum}");
}

#[tokio::test]
async fn store_outage_degrades_to_l1() {
    let store = Arc::new(FlakyStore::default());
    let cache = MultiLayerCache::with_store(config(10), store.clone());
    assert!(cache.set("warm", b"1", None, None).await);

    store.down.store(true, Ordering::SeqCst);
    assert!(cache.set("k", b"v", None, None).await, "l1 still accepts writes");
    assert_eq!(cache.get("k").await.as_deref(), Some(&b"v"[..]));
    assert_eq!(cache.get("cold").await, None);
    assert!(cache.exists("warm").await);
    assert_eq!(cache.invalidate_pattern("*").await, 0);
    assert!(!cache.exists("warm").await);

    let stats = cache.stats();
    assert_eq!((stats.l1_hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn write_fails_only_when_both_tiers_fail() {
    let store = Arc::new(FlakyStore::default());
    store.down.store(true, Ordering::SeqCst);
    let broken_l1: Box<dyn CacheLayer> = Box::new(ClosedLayer);
    let cache = MultiLayerCache::new(config(4), broken_l1, Box::new(RemoteLayer::new(store)));
    assert!(!cache.set("k", b"v", None, None).await);
    assert!(!cache.delete("k").await);
    assert_eq!(cache.get("k").await, None);
    assert_eq!(cache.stats().misses, 1);
}

struct ClosedLayer;

#[async_trait]
impl CacheLayer for ClosedLayer {
    fn name(&self) -> &'static str {
        "closed"
    }
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(CacheError::Closed)
    }
    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<()> {
        Err(CacheError::Closed)
    }
    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(CacheError::Closed)
    }
    async fn exists(&self, _key: &str) -> Result<bool> {
        Err(CacheError::Closed)
    }
    async fn invalidate_pattern(&self, _pattern: &str) -> Result<u64> {
        Err(CacheError::Closed)
    }
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn pattern_invalidation_clears_both_tiers() {
    let cache = MultiLayerCache::with_store(config(10), Arc::new(InMemoryStore::new()));
    for key in ["etl:source:p:1", "etl:source:p:2", "etl:source:q:1"] {
        cache.set(key, b"x", None, None).await;
    }
    assert_eq!(cache.invalidate_pattern("etl:source:p:*").await, 2);
    assert!(!cache.exists("etl:source:p:1").await);
    assert!(cache.exists("etl:source:q:1").await);
    assert_eq!(cache.stats().l1_size, Some(1));
}

#[tokio::test]
async fn sqlite_store_is_shared_between_caches() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = CacheConfig {
        sqlite_path: Some(dir.path().join("cache.db")),
        ..CacheConfig::default()
    };
    let writer = MultiLayerCache::from_config(cfg.clone()).unwrap();
    let reader = MultiLayerCache::from_config(cfg).unwrap();

    assert!(writer.set_json("rows", &serde_json::json!([{"id": 1}]), None, None).await);
    let rows: serde_json::Value = reader.get_json("rows").await.unwrap();
    assert_eq!(rows[0]["id"], 1);
    assert_eq!(reader.stats().l2_hits, 1);

    writer.shutdown().await;
    reader.shutdown().await;
}

#[tokio::test]
async fn json_helpers_absorb_encoding_errors() {
    let cache = MultiLayerCache::with_store(config(10), Arc::new(InMemoryStore::new()));
    assert!(cache.set("raw", b"not json", None, None).await);
    assert!(cache.get_json::<serde_json::Value>("raw").await.is_none());
    assert!(cache.set_json("num", &7, None, None).await);
    assert!(cache.get_json::<Vec<String>>("num").await.is_none());
    assert_eq!(cache.stats().l1_hits, 2);

    // Map keys must be strings in JSON.
    let mut unencodable = std::collections::BTreeMap::new();
    unencodable.insert(vec![1u8], 1u8);
    assert!(!cache.set_json("bad", &unencodable, None, None).await);
    assert!(!cache.exists("bad").await);
}
