//! `SQLite`-backed implementation of [`KeyValueStore`].
//!
//! Lets several processes share the second cache tier through one database
//! file. Every call runs on the blocking pool behind a single
//! `Mutex<Connection>`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{CacheError, Result};
use crate::store::KeyValueStore;

/// Idempotent DDL for the cache table. `expires_at` is unix milliseconds.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry ON cache_entries (expires_at);
";

/// File-backed key-value store.
///
/// Create with [`SqliteStore::open`] or [`SqliteStore::in_memory`] for tests.
/// Expiry uses wall-clock time so entries stay valid across processes.
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    /// Open or create a cache database at `path`, dropping entries that
    /// already expired.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory can't be created, or
    /// [`CacheError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Sqlite`] if the database can't be initialized.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES)?;
        let purged = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            [now_millis()],
        )?;
        if purged > 0 {
            tracing::debug!(purged, "Dropped expired cache entries");
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| CacheError::LockPoisoned)?;
            let conn = guard.as_ref().ok_or(CacheError::Closed)?;
            op(conn)
        })
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_millis().saturating_add(ttl_ms)
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                    rusqlite::params![key, now_millis()],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn setex(&self, key: &str, ttl: Duration, value: &[u8]) -> Result<()> {
        let key = key.to_string();
        let value = value.to_vec();
        let expires_at = expiry_millis(ttl);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3",
                rusqlite::params![key, value, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let now = now_millis();
            let mut live = 0u64;
            for key in &keys {
                let removed = tx.execute(
                    "DELETE FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                    rusqlite::params![key, now],
                )?;
                live += removed as u64;
                tx.execute("DELETE FROM cache_entries WHERE key = ?1", [key])?;
            }
            tx.commit()?;
            Ok(live)
        })
        .await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        // Reject patterns the in-memory store would reject too.
        crate::store::glob_to_regex(pattern)?;
        let pattern = pattern.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM cache_entries WHERE key GLOB ?1 AND expires_at > ?2 ORDER BY key",
            )?;
            let keys = stmt
                .query_map(rusqlite::params![pattern, now_millis()], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                    rusqlite::params![key, now_millis()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?
            .take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| CacheError::Sqlite(e))?;
        }
        Ok(())
    }
}
