//! Source and destination contracts.
//!
//! The executor only talks to connectors through [`Source`], [`BatchStream`]
//! and [`Destination`]. Built-in implementations live in
//! [`crate::connectors`]; embedders register their own through
//! [`ConnectorRegistry`](crate::connectors::ConnectorRegistry).

use async_trait::async_trait;
use etlflow_transform::filter::Condition;
use etlflow_transform::sort::{sort, SortConfig, SortKey};
use etlflow_types::catalog::SchemaInfo;
use etlflow_types::error::ConnectorError;
use etlflow_types::summary::{ConnectionStatus, LoadSummary};
use etlflow_types::wire::LoadMode;
use etlflow_types::{Dataset, Record};
use serde::{Deserialize, Serialize};

/// Row selection pushed down to a source.
///
/// Applied in order: `filters` (all must match), `order_by`, `offset`,
/// then the request limit, then `columns` projection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceQuery {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<SortKey>,
    #[serde(default)]
    pub offset: usize,
}

impl SourceQuery {
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|c| c.matches(record))
    }

    /// Keep only the selected columns. Selected columns absent from the
    /// record come back as null.
    #[must_use]
    pub fn project(&self, record: Record) -> Record {
        match &self.columns {
            None => record,
            Some(columns) => {
                let mut record = record;
                columns
                    .iter()
                    .map(|c| (c.clone(), record.remove(c).unwrap_or_default()))
                    .collect()
            }
        }
    }

    /// Run the whole query over materialized rows.
    ///
    /// # Errors
    ///
    /// Returns a data error when an `order_by` column is absent.
    pub fn apply(&self, rows: Dataset, limit: Option<usize>) -> Result<Dataset, ConnectorError> {
        let mut rows: Dataset = rows.into_iter().filter(|r| self.matches(r)).collect();
        if !self.order_by.is_empty() {
            let config = SortConfig {
                columns: self.order_by.clone(),
            };
            rows = sort(&rows, &config)
                .map_err(|e| ConnectorError::data("INVALID_ORDER_BY", e.to_string()))?
                .data;
        }
        Ok(rows
            .into_iter()
            .skip(self.offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| self.project(r))
            .collect())
    }
}

/// Parameters for [`Source::extract`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    pub query: SourceQuery,
    /// Maximum rows per batch; at least 1.
    pub batch_size: usize,
    /// Maximum rows overall (sample mode).
    pub limit: Option<usize>,
}

/// Parameters for [`Destination::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub config: serde_json::Value,
    pub mode: LoadMode,
    /// Required for [`LoadMode::Upsert`].
    pub primary_key: Vec<String>,
}

/// Lazily produced batches from one extraction.
#[async_trait]
pub trait BatchStream: Send {
    /// Next non-empty batch, or `None` when exhausted.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when reading fails.
    async fn next_batch(&mut self) -> Result<Option<Dataset>, ConnectorError>;
}

/// A data source.
#[async_trait]
pub trait Source: Send + Sync {
    /// Establish the connection. `Ok(false)` means the source is reachable
    /// but refused.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when the connection attempt fails.
    async fn connect(&mut self) -> Result<bool, ConnectorError>;

    /// Probe connectivity without reading data.
    async fn test_connection(&self) -> ConnectionStatus;

    /// Describe the dataset the source exposes.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when the schema can't be read.
    async fn schema_info(&self) -> Result<SchemaInfo, ConnectorError>;

    /// Start an extraction.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] for an invalid query or a failed read.
    async fn extract(&self, request: ExtractRequest) -> Result<Box<dyn BatchStream>, ConnectorError>;
}

/// A data sink.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Write `dataset` according to `request.mode`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when the write fails.
    async fn load(&self, dataset: &[Record], request: &LoadRequest)
        -> Result<LoadSummary, ConnectorError>;
}

/// [`BatchStream`] over rows already in memory.
pub struct VecBatches {
    rows: std::vec::IntoIter<Record>,
    batch_size: usize,
}

impl VecBatches {
    #[must_use]
    pub fn new(rows: Dataset, batch_size: usize) -> Self {
        Self {
            rows: rows.into_iter(),
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl BatchStream for VecBatches {
    async fn next_batch(&mut self) -> Result<Option<Dataset>, ConnectorError> {
        let batch: Dataset = self.rows.by_ref().take(self.batch_size).collect();
        Ok((!batch.is_empty()).then_some(batch))
    }
}

/// Drain a stream into one dataset.
///
/// # Errors
///
/// Propagates the first batch error.
pub async fn collect_batches(stream: &mut dyn BatchStream) -> Result<Dataset, ConnectorError> {
    let mut rows = Dataset::new();
    while let Some(batch) = stream.next_batch().await? {
        rows.extend(batch);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use etlflow_types::value::record;
    use etlflow_types::Value;
    use serde_json::json;

    fn people() -> Dataset {
        vec![
            record([("id", Value::Int(1)), ("age", Value::Int(40)), ("name", Value::from("a"))]),
            record([("id", Value::Int(2)), ("age", Value::Int(25)), ("name", Value::from("b"))]),
            record([("id", Value::Int(3)), ("age", Value::Int(35)), ("name", Value::from("c"))]),
        ]
    }

    #[test]
    fn query_filters_sorts_and_projects() {
        let query: SourceQuery = serde_json::from_value(json!({
            "filters": [{"column": "age", "operator": "greater_than", "value": 30}],
            "order_by": [{"column": "age"}],
            "columns": ["id"],
        }))
        .unwrap();
        let rows = query.apply(people(), None).unwrap();
        assert_eq!(
            rows,
            vec![record([("id", Value::Int(3))]), record([("id", Value::Int(1))])]
        );
    }

    #[test]
    fn query_offset_then_limit() {
        let query = SourceQuery {
            offset: 1,
            ..SourceQuery::default()
        };
        let rows = query.apply(people(), Some(1)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Value::Int(2));
    }

    #[test]
    fn unknown_order_by_column_is_data_error() {
        let query: SourceQuery =
            serde_json::from_value(json!({"order_by": [{"column": "zzz"}]})).unwrap();
        let err = query.apply(people(), None).unwrap_err();
        assert_eq!(err.code, "INVALID_ORDER_BY");
    }

    #[test]
    fn query_rejects_unknown_fields() {
        assert!(serde_json::from_value::<SourceQuery>(json!({"where": "x"})).is_err());
    }

    #[tokio::test]
    async fn vec_batches_splits_rows() {
        let mut stream = VecBatches::new(people(), 2);
        assert_eq!(stream.next_batch().await.unwrap().unwrap().len(), 2);
        assert_eq!(stream.next_batch().await.unwrap().unwrap().len(), 1);
        assert!(stream.next_batch().await.unwrap().is_none());
    }

    #[test]
    fn traits_are_object_safe() {
        fn _source(_: &dyn Source) {}
        fn _destination(_: &dyn Destination) {}
        fn _stream(_: &dyn BatchStream) {}
    }
}
