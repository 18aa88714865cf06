//! `memory` destination: a shared in-process buffer.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use etlflow_types::error::ConnectorError;
use etlflow_types::summary::LoadSummary;
use etlflow_types::wire::LoadMode;
use etlflow_types::{Dataset, Record};

use crate::connector::{Destination, LoadRequest};

/// Destination collecting rows in memory. Clones share the same buffer, so a
/// caller can keep one handle and inspect what a pipeline loaded.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    rows: Arc<Mutex<Dataset>>,
    loads: Arc<Mutex<u64>>,
}

impl MemoryDestination {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_rows(&self) -> Result<MutexGuard<'_, Dataset>, ConnectorError> {
        self.rows
            .lock()
            .map_err(|_| ConnectorError::internal("LOCK_POISONED", "memory destination lock poisoned"))
    }

    /// Snapshot of the buffered rows.
    #[must_use]
    pub fn rows(&self) -> Dataset {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    /// Number of `load` calls received.
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.loads.lock().map(|n| *n).unwrap_or_default()
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn load(
        &self,
        dataset: &[Record],
        request: &LoadRequest,
    ) -> Result<LoadSummary, ConnectorError> {
        let start = Instant::now();
        let rows_loaded = {
            let mut rows = self.lock_rows()?;
            match request.mode {
                LoadMode::Append => {
                    rows.extend_from_slice(dataset);
                    dataset.len() as u64
                }
                LoadMode::Replace => {
                    *rows = dataset.to_vec();
                    dataset.len() as u64
                }
                LoadMode::Upsert => super::upsert_rows(&mut rows, dataset, &request.primary_key)?,
            }
        };
        if let Ok(mut loads) = self.loads.lock() {
            *loads += 1;
        }
        Ok(LoadSummary::success(rows_loaded, start.elapsed().as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etlflow_types::value::record;
    use etlflow_types::Value;

    fn request(mode: LoadMode) -> LoadRequest {
        LoadRequest {
            config: serde_json::Value::Null,
            mode,
            primary_key: vec!["id".into()],
        }
    }

    #[tokio::test]
    async fn clones_share_the_buffer() {
        let sink = MemoryDestination::new();
        let handle = sink.clone();
        let rows = vec![record([("id", Value::Int(1))]), record([("id", Value::Int(2))])];

        sink.load(&rows, &request(LoadMode::Append)).await.unwrap();
        sink.load(&rows, &request(LoadMode::Append)).await.unwrap();
        assert_eq!(handle.rows().len(), 4);

        sink.load(&rows[..1], &request(LoadMode::Replace)).await.unwrap();
        assert_eq!(handle.rows().len(), 1);

        let summary = sink.load(&rows, &request(LoadMode::Upsert)).await.unwrap();
        assert_eq!(summary.rows_loaded, 2);
        assert_eq!(handle.rows().len(), 2);
        assert_eq!(handle.load_count(), 4);
    }
}
