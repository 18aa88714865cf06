//! Cache error types.

/// Errors produced by cache layers and key-value stores.
///
/// The [`MultiLayerCache`](crate::MultiLayerCache) coordinator never returns
/// these to callers; they surface only from the individual layers.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system I/O failure (e.g. creating the store directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Glob pattern could not be translated.
    #[error("invalid key pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Internal mutex was poisoned by a panicked thread.
    #[error("cache lock poisoned")]
    LockPoisoned,

    /// A blocking store task panicked or was cancelled.
    #[error("cache task failed: {0}")]
    Task(String),

    /// The layer was shut down.
    #[error("cache layer closed")]
    Closed,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, CacheError>;
