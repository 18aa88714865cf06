//! Newline-delimited JSON files as source and destination.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use etlflow_types::catalog::{infer_schema, SchemaInfo};
use etlflow_types::error::ConnectorError;
use etlflow_types::summary::{ConnectionStatus, LoadSummary};
use etlflow_types::wire::LoadMode;
use etlflow_types::{Dataset, Record};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

use crate::connector::{
    BatchStream, Destination, ExtractRequest, LoadRequest, Source, SourceQuery, VecBatches,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonlConfig {
    path: PathBuf,
}

fn io_error(path: &Path, err: &std::io::Error) -> ConnectorError {
    let retryable = err.kind() != std::io::ErrorKind::NotFound;
    ConnectorError::io("IO_ERROR", format!("{}: {err}", path.display())).with_retryable(retryable)
}

fn parse_line(line: &str, line_no: usize) -> Result<Record, ConnectorError> {
    serde_json::from_str(line).map_err(|e| {
        ConnectorError::data("INVALID_JSON", format!("line {line_no}: {e}"))
            .with_details(serde_json::json!({ "line": line_no }))
    })
}

async fn read_rows(path: &Path) -> Result<Dataset, ConnectorError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| io_error(path, &e))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| parse_line(line, index + 1))
        .collect()
}

/// Reads one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Build from `{path: ...}`.
    ///
    /// # Errors
    ///
    /// Config error when `path` is missing.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConnectorError> {
        let parsed: JsonlConfig = super::parse_config("jsonl", config)?;
        Ok(Self::new(parsed.path))
    }
}

#[async_trait]
impl Source for JsonlSource {
    async fn connect(&mut self) -> Result<bool, ConnectorError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&self.path, &e)),
        }
    }

    async fn test_connection(&self) -> ConnectionStatus {
        let details = serde_json::json!({ "path": self.path.display().to_string() });
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => ConnectionStatus::success(details),
            _ => ConnectionStatus::failed(details),
        }
    }

    async fn schema_info(&self) -> Result<SchemaInfo, ConnectorError> {
        Ok(infer_schema(&read_rows(&self.path).await?))
    }

    async fn extract(&self, request: ExtractRequest) -> Result<Box<dyn BatchStream>, ConnectorError> {
        if !request.query.order_by.is_empty() {
            // Ordering needs every row before the first batch.
            let rows = request.query.apply(read_rows(&self.path).await?, request.limit)?;
            return Ok(Box::new(VecBatches::new(rows, request.batch_size)));
        }
        let file = File::open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, &e))?;
        Ok(Box::new(JsonlStream {
            path: self.path.clone(),
            lines: BufReader::new(file).lines(),
            skip: request.query.offset,
            remaining: request.limit,
            query: request.query,
            batch_size: request.batch_size.max(1),
            line_no: 0,
        }))
    }
}

/// Streams a file line by line, applying the query as rows arrive.
struct JsonlStream {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    query: SourceQuery,
    skip: usize,
    remaining: Option<usize>,
    batch_size: usize,
    line_no: usize,
}

#[async_trait]
impl BatchStream for JsonlStream {
    async fn next_batch(&mut self) -> Result<Option<Dataset>, ConnectorError> {
        let mut batch = Dataset::new();
        while batch.len() < self.batch_size && self.remaining != Some(0) {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .map_err(|e| io_error(&self.path, &e))?
            else {
                break;
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_line(&line, self.line_no)?;
            if !self.query.matches(&record) {
                continue;
            }
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            batch.push(self.query.project(record));
        }
        Ok((!batch.is_empty()).then_some(batch))
    }
}

/// Writes one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlDestination {
    path: PathBuf,
}

impl JsonlDestination {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Build from `{path: ...}`.
    ///
    /// # Errors
    ///
    /// Config error when `path` is missing.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConnectorError> {
        let parsed: JsonlConfig = super::parse_config("jsonl", config)?;
        Ok(Self::new(parsed.path))
    }

    async fn write(&self, rows: &[Record], append: bool) -> Result<(), ConnectorError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, &e))?;
        }
        let mut buf = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buf, row).map_err(|e| {
                ConnectorError::data("SERIALIZE", format!("cannot encode record: {e}"))
            })?;
            buf.push(b'\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, &e))?;
        file.write_all(&buf)
            .await
            .map_err(|e| io_error(&self.path, &e))?;
        file.flush().await.map_err(|e| io_error(&self.path, &e))
    }
}

#[async_trait]
impl Destination for JsonlDestination {
    async fn load(
        &self,
        dataset: &[Record],
        request: &LoadRequest,
    ) -> Result<LoadSummary, ConnectorError> {
        let start = Instant::now();
        let rows_loaded = match request.mode {
            LoadMode::Append => {
                self.write(dataset, true).await?;
                dataset.len() as u64
            }
            LoadMode::Replace => {
                self.write(dataset, false).await?;
                dataset.len() as u64
            }
            LoadMode::Upsert => {
                let mut existing = match tokio::fs::try_exists(&self.path).await {
                    Ok(true) => read_rows(&self.path).await?,
                    Ok(false) => Dataset::new(),
                    Err(e) => return Err(io_error(&self.path, &e)),
                };
                let written = super::upsert_rows(&mut existing, dataset, &request.primary_key)?;
                self.write(&existing, false).await?;
                written
            }
        };
        tracing::debug!(
            path = %self.path.display(),
            mode = %request.mode,
            rows_loaded,
            "JSONL load finished"
        );
        Ok(LoadSummary::success(rows_loaded, start.elapsed().as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::collect_batches;
    use etlflow_types::value::record;
    use etlflow_types::Value;
    use serde_json::json;

    fn request(mode: LoadMode) -> LoadRequest {
        LoadRequest {
            config: json!({}),
            mode,
            primary_key: vec!["id".into()],
        }
    }

    fn extract_all(query: SourceQuery, batch_size: usize, limit: Option<usize>) -> ExtractRequest {
        ExtractRequest {
            query,
            batch_size,
            limit,
        }
    }

    #[tokio::test]
    async fn write_then_stream_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("rows.jsonl");
        let dest = JsonlDestination::new(&path);
        let rows: Dataset = (1..=5)
            .map(|i| record([("id", Value::Int(i)), ("even", Value::Bool(i % 2 == 0))]))
            .collect();
        let summary = dest.load(&rows, &request(LoadMode::Append)).await.unwrap();
        assert_eq!(summary.rows_loaded, 5);

        let mut source = JsonlSource::new(&path);
        assert!(source.connect().await.unwrap());
        let query: SourceQuery = serde_json::from_value(json!({
            "filters": [{"column": "even", "operator": "equals", "value": false}],
            "offset": 1,
        }))
        .unwrap();
        let mut stream = source.extract(extract_all(query, 1, None)).await.unwrap();
        let first = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(first, vec![record([("id", Value::Int(3)), ("even", Value::Bool(false))])]);
        let rest = collect_batches(stream.as_mut()).await.unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn replace_and_upsert_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        let dest = JsonlDestination::new(&path);
        let first = vec![
            record([("id", Value::Int(1)), ("v", Value::from("a"))]),
            record([("id", Value::Int(2)), ("v", Value::from("b"))]),
        ];
        dest.load(&first, &request(LoadMode::Append)).await.unwrap();
        dest.load(&first, &request(LoadMode::Append)).await.unwrap();
        assert_eq!(read_rows(&path).await.unwrap().len(), 4);

        dest.load(&first, &request(LoadMode::Replace)).await.unwrap();
        assert_eq!(read_rows(&path).await.unwrap(), first);

        let change = vec![
            record([("id", Value::Int(2)), ("v", Value::from("B"))]),
            record([("id", Value::Int(3)), ("v", Value::from("c"))]),
        ];
        let summary = dest.load(&change, &request(LoadMode::Upsert)).await.unwrap();
        assert_eq!(summary.rows_loaded, 2);
        let stored = read_rows(&path).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[1]["v"], Value::from("B"));
    }

    #[tokio::test]
    async fn missing_file_is_not_connected() {
        let mut source = JsonlSource::new("/nonexistent/etlflow/rows.jsonl");
        assert!(!source.connect().await.unwrap());
        assert!(!source.test_connection().await.is_success());
        let err = source
            .extract(extract_all(SourceQuery::default(), 10, None))
            .await
            .err()
            .unwrap();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn malformed_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"id\": 1}\n\nnot json\n").unwrap();
        let source = JsonlSource::new(&path);
        let mut stream = source
            .extract(extract_all(SourceQuery::default(), 10, Some(5)))
            .await
            .unwrap();
        let err = collect_batches(stream.as_mut()).await.unwrap_err();
        assert_eq!(err.code, "INVALID_JSON");
        assert_eq!(err.details, Some(json!({"line": 3})));
    }

    #[tokio::test]
    async fn limit_stops_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, "{\"id\": 1}\n{\"id\": 2}\n{\"id\": 3}\n").unwrap();
        let source = JsonlSource::new(&path);
        let mut stream = source
            .extract(extract_all(SourceQuery::default(), 10, Some(2)))
            .await
            .unwrap();
        let rows = collect_batches(stream.as_mut()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(source.schema_info().await.unwrap().row_count, Some(3));
    }
}
