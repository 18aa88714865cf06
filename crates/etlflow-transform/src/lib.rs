//! Transformation operators for etlflow pipelines.
//!
//! Every operator is a pure function from an input [`Dataset`] and a typed
//! config to a [`TransformOutput`] (result dataset plus metadata). Configs
//! arrive as loose JSON at the pipeline boundary and are decoded once via
//! [`TransformConfig::decode`]. Use [`apply`] to dispatch a decoded config.

pub mod aggregate;
pub mod calculate;
pub mod config;
pub mod dedup;
pub mod error;
pub mod filter;
pub mod join;
pub mod map;
pub mod output;
pub mod sort;
pub mod validate;

use etlflow_types::value::has_column;
use etlflow_types::{Dataset, Record};

pub use config::{ColumnSelector, TransformConfig};
pub use error::TransformError;
pub use output::{OperatorDetails, TransformMetadata, TransformOutput, TransformReport};

/// Data error for the first of `columns` absent from every record.
/// Empty datasets have no schema to check against and always pass.
pub(crate) fn require_columns(dataset: &[Record], columns: &[&str]) -> error::Result<()> {
    if dataset.is_empty() {
        return Ok(());
    }
    match columns.iter().find(|c| !has_column(dataset, c)) {
        Some(missing) => Err(TransformError::missing_column(missing)),
        None => Ok(()),
    }
}

/// Run a decoded operator over `dataset`.
///
/// `right` is the right-hand dataset for JOIN; other operators ignore it.
///
/// # Errors
///
/// Whatever the operator reports; a JOIN without a right dataset is a config
/// error.
pub fn apply(
    config: &TransformConfig,
    dataset: &[Record],
    right: Option<&[Record]>,
) -> error::Result<TransformOutput> {
    match config {
        TransformConfig::Join(c) => {
            let right = right.ok_or_else(|| {
                TransformError::config("join requires a right-hand dataset")
            })?;
            join::join(dataset, right, c)
        }
        TransformConfig::Deduplicate(c) => dedup::deduplicate(dataset, c),
        TransformConfig::Validate(c) => validate::validate(dataset, c),
        TransformConfig::Aggregate(c) => aggregate::aggregate(dataset, c),
        TransformConfig::Filter(c) => filter::filter(dataset, c),
        TransformConfig::Sort(c) => sort::sort(dataset, c),
        TransformConfig::Map(c) => map::map(dataset, c),
        TransformConfig::Calculate(c) => calculate::calculate(dataset, c),
    }
}

/// Decode and run in one call, returning the reporting shape.
#[must_use]
pub fn run_report(
    kind: &str,
    config: serde_json::Value,
    dataset: &Dataset,
    right: Option<&Dataset>,
) -> TransformReport {
    let result = TransformConfig::decode(kind, config)
        .and_then(|c| apply(&c, dataset, right.map(Vec::as_slice)));
    TransformReport::from_result(result)
}
