//! In-process LRU tier.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::time::Instant;

use crate::error::{CacheError, Result};
use crate::layer::CacheLayer;
use crate::store::glob_to_regex;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Bounded, strictly least-recently-used map with per-entry expiry.
///
/// Reads and writes both refresh recency. When full, expired entries are
/// dropped first; only if none expired is the least recently used live entry
/// evicted. Expiry follows the tokio clock.
pub struct MemoryLayer {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryLayer {
    /// Create a tier holding at most `max_size` entries (minimum one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, Entry>>> {
        self.entries.lock().map_err(|_| CacheError::LockPoisoned)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().map_or(0, |entries| entries.cap().get())
    }

    /// Keys from least to most recently used. Does not touch recency.
    #[must_use]
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.lock().map_or_else(
            |_| Vec::new(),
            |entries| entries.iter().rev().map(|(k, _)| k.clone()).collect(),
        )
    }

    fn purge_expired(entries: &mut LruCache<String, Entry>, now: Instant) -> usize {
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }
}

#[async_trait]
impl CacheLayer for MemoryLayer {
    fn name(&self) -> &'static str {
        "l1"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let live = entries.peek(key).map(|entry| entry.is_live(now));
        match live {
            Some(true) => Ok(entries.get(key).map(|entry| entry.value.clone())),
            Some(false) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        if !entries.contains(key) && entries.len() >= entries.cap().get() {
            let purged = Self::purge_expired(&mut entries, now);
            if purged > 0 {
                tracing::trace!(purged, "Dropped expired l1 entries before insert");
            }
        }
        let evicted = entries.push(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: now + ttl,
            },
        );
        if let Some((evicted_key, _)) = evicted.filter(|(k, _)| k != key) {
            tracing::debug!(key = %evicted_key, "Evicted least recently used l1 entry");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self.lock()?.pop(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let entries = self.lock()?;
        Ok(entries.peek(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let matcher = glob_to_regex(pattern)?;
        let mut entries = self.lock()?;
        let matching: Vec<String> = entries
            .iter()
            .filter(|(k, _)| matcher.is_match(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &matching {
            entries.pop(key);
        }
        Ok(matching.len() as u64)
    }

    async fn close(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn entry_count(&self) -> Option<usize> {
        self.lock().ok().map(|entries| entries.len())
    }
}
