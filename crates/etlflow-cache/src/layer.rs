//! Cache tier trait definition.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// One tier of the cache.
///
/// [`MultiLayerCache`](crate::MultiLayerCache) holds two of these: an
/// in-process tier in front of a shared one. Implementations must be
/// `Send + Sync` for use behind `Box<dyn CacheLayer>`.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Short label used in log events.
    fn name(&self) -> &'static str;

    /// Fetch a live value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Remove `key`, returning whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove every key matching the glob `pattern`, returning the count.
    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64>;

    /// Release resources. Later calls may fail.
    async fn close(&self) -> Result<()>;

    /// Number of entries currently held, when the tier can tell cheaply.
    fn entry_count(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn CacheLayer`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn CacheLayer) {}
    }
}
