//! Shared tier over a [`KeyValueStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::layer::CacheLayer;
use crate::store::KeyValueStore;

/// Adapts a [`KeyValueStore`] to the [`CacheLayer`] contract.
pub struct RemoteLayer {
    store: Arc<dyn KeyValueStore>,
}

impl RemoteLayer {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

#[async_trait]
impl CacheLayer for RemoteLayer {
    fn name(&self) -> &'static str {
        "l2"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.store.setex(key, ttl, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.delete(&[key.to_string()]).await? > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.store.exists(key).await
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self.store.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.store.delete(&keys).await
    }

    async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}
