//! External key-value store contract and the process-local implementation.
//!
//! [`KeyValueStore`] is the shape the second cache tier talks to: string keys,
//! opaque byte values, a per-entry TTL and a glob key scan. [`InMemoryStore`]
//! keeps everything in a map and is what tests and single-process runs use;
//! [`SqliteStore`](crate::sqlite::SqliteStore) shares entries across processes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::Instant;

use crate::error::{CacheError, Result};

/// Storage contract for the second cache tier.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn KeyValueStore>`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a live value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    async fn setex(&self, key: &str, ttl: Duration, value: &[u8]) -> Result<()>;

    /// Remove `keys`, returning how many live entries were deleted.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Live keys matching a glob `pattern` (`*`, `?`, `[...]`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Release the underlying connection. Later calls fail with
    /// [`CacheError::Closed`].
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Translate a glob pattern into an anchored regex.
///
/// Supports `*`, `?`, bracket classes (`[abc]`, `[a-z]`, `[!x]`/`[^x]`) and
/// backslash escapes. Everything else matches literally.
///
/// # Errors
///
/// [`CacheError::InvalidPattern`] for an unclosed bracket class.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let invalid = |message: &str| CacheError::InvalidPattern {
        pattern: pattern.to_string(),
        message: message.to_string(),
    };

    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?s)^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('!' | '^')) {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                let mut first = true;
                while let Some(inner) = chars.next() {
                    match inner {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | ']' | '&' | '~' => {
                            out.push('\\');
                            out.push(inner);
                        }
                        _ => out.push(inner),
                    }
                    first = false;
                }
                if !closed {
                    return Err(invalid("unclosed character class"));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| invalid(&e.to_string()))
}

struct StoredValue {
    value: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local [`KeyValueStore`].
///
/// Expired entries are dropped lazily when touched. Uses the tokio clock, so a
/// paused test runtime controls expiry.
pub struct InMemoryStore {
    entries: Mutex<Option<HashMap<String, StoredValue>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Some(HashMap::new())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<HashMap<String, StoredValue>>>> {
        self.entries.lock().map_err(|_| CacheError::LockPoisoned)
    }

    fn with_entries<T>(
        &self,
        op: impl FnOnce(&mut HashMap<String, StoredValue>) -> T,
    ) -> Result<T> {
        let mut guard = self.lock()?;
        let entries = guard.as_mut().ok_or(CacheError::Closed)?;
        Ok(op(entries))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        self.with_entries(|entries| {
            let live = entries.get(key).map(|stored| stored.is_live(now));
            match live {
                Some(true) => entries.get(key).map(|stored| stored.value.clone()),
                Some(false) => {
                    entries.remove(key);
                    None
                }
                None => None,
            }
        })
    }

    async fn setex(&self, key: &str, ttl: Duration, value: &[u8]) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                StoredValue {
                    value: value.to_vec(),
                    expires_at,
                },
            );
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let now = Instant::now();
        self.with_entries(|entries| {
            let mut deleted = 0;
            for key in keys {
                if entries.remove(key).is_some_and(|s| s.is_live(now)) {
                    deleted += 1;
                }
            }
            deleted
        })
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        self.with_entries(|entries| {
            entries.retain(|_, stored| stored.is_live(now));
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|k| matcher.is_match(k))
                .cloned()
                .collect();
            keys.sort();
            keys
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        self.with_entries(|entries| entries.get(key).is_some_and(|s| s.is_live(now)))
    }

    async fn close(&self) -> Result<()> {
        self.lock()?.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_translation() {
        let re = glob_to_regex("etl:source:*").unwrap();
        assert!(re.is_match("etl:source:orders:abc"));
        assert!(!re.is_match("etl:sink:orders"));

        let re = glob_to_regex("user:?").unwrap();
        assert!(re.is_match("user:1"));
        assert!(!re.is_match("user:12"));

        let re = glob_to_regex("h[ae]llo").unwrap();
        assert!(re.is_match("hello") && re.is_match("hallo"));
        assert!(!re.is_match("hillo"));

        let re = glob_to_regex("h[!e]llo").unwrap();
        assert!(re.is_match("hallo"));
        assert!(!re.is_match("hello"));

        let re = glob_to_regex("a.b+c").unwrap();
        assert!(re.is_match("a.b+c"));
        assert!(!re.is_match("aXb+c"));

        let re = glob_to_regex(r"literal\*").unwrap();
        assert!(re.is_match("literal*"));
        assert!(!re.is_match("literally"));
    }

    #[test]
    fn unclosed_class_is_rejected() {
        assert!(matches!(
            glob_to_regex("user:[ab"),
            Err(CacheError::InvalidPattern { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_on_the_tokio_clock() {
        let store = InMemoryStore::new();
        store.setex("k", Duration::from_secs(10), b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn delete_counts_live_entries_only() {
        let store = InMemoryStore::new();
        store.setex("a", Duration::from_secs(60), b"1").await.unwrap();
        store.setex("b", Duration::from_secs(60), b"2").await.unwrap();
        let n = store
            .delete(&["a".into(), "b".into(), "zzz".into()])
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn keys_scan_is_sorted_and_filtered() {
        let store = InMemoryStore::new();
        for key in ["etl:b", "etl:a", "other"] {
            store.setex(key, Duration::from_secs(60), b"x").await.unwrap();
        }
        assert_eq!(store.keys("etl:*").await.unwrap(), vec!["etl:a", "etl:b"]);
    }

    #[tokio::test]
    async fn closed_store_refuses_work() {
        let store = InMemoryStore::new();
        store.close().await.unwrap();
        assert!(matches!(store.get("k").await, Err(CacheError::Closed)));
    }
}
