//! `inline` source: rows embedded in the step config.

use async_trait::async_trait;
use etlflow_types::catalog::{infer_schema, SchemaInfo};
use etlflow_types::error::ConnectorError;
use etlflow_types::summary::ConnectionStatus;
use etlflow_types::Dataset;
use serde::Deserialize;

use crate::connector::{BatchStream, ExtractRequest, Source, VecBatches};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InlineConfig {
    rows: Dataset,
}

/// Source serving a fixed list of rows.
#[derive(Debug, Clone)]
pub struct InlineSource {
    rows: Dataset,
}

impl InlineSource {
    #[must_use]
    pub fn new(rows: Dataset) -> Self {
        Self { rows }
    }

    /// Build from `{rows: [...]}`.
    ///
    /// # Errors
    ///
    /// Config error when `rows` is missing or not a list of objects.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConnectorError> {
        let parsed: InlineConfig = super::parse_config("inline", config)?;
        Ok(Self::new(parsed.rows))
    }
}

#[async_trait]
impl Source for InlineSource {
    async fn connect(&mut self) -> Result<bool, ConnectorError> {
        Ok(true)
    }

    async fn test_connection(&self) -> ConnectionStatus {
        ConnectionStatus::success(serde_json::json!({ "rows": self.rows.len() }))
    }

    async fn schema_info(&self) -> Result<SchemaInfo, ConnectorError> {
        Ok(infer_schema(&self.rows))
    }

    async fn extract(&self, request: ExtractRequest) -> Result<Box<dyn BatchStream>, ConnectorError> {
        let rows = request.query.apply(self.rows.clone(), request.limit)?;
        Ok(Box::new(VecBatches::new(rows, request.batch_size)))
    }
}
