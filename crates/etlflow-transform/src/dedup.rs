//! DEDUPLICATE: drop records whose selected columns repeat.

use std::collections::HashSet;

use etlflow_types::value::columns;
use etlflow_types::{Record, Value};
use serde::{Deserialize, Serialize};

use crate::config::ColumnSelector;
use crate::error::Result;
use crate::output::{OperatorDetails, TransformOutput};
use crate::require_columns;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStrategy {
    /// Type-aware, case-sensitive equality.
    #[default]
    Exact,
    /// Case-insensitive, whitespace-collapsed text; numbers by value.
    Fuzzy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keep {
    #[default]
    First,
    Last,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeduplicateConfig {
    /// Columns compared; all columns when absent.
    #[serde(default)]
    pub columns: Option<ColumnSelector>,
    #[serde(default)]
    pub strategy: DedupStrategy,
    #[serde(default)]
    pub keep: Keep,
}

impl DeduplicateConfig {
    pub(crate) fn check(&self) -> Result<()> {
        if let Some(sel) = &self.columns {
            sel.names("columns")?;
        }
        Ok(())
    }
}

fn fuzzy_key(value: &Value) -> String {
    match value {
        Value::Text(s) => {
            let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
            format!("s:{}", collapsed.to_lowercase())
        }
        other => other.key(true),
    }
}

fn record_key(record: &Record, cols: &[String], strategy: DedupStrategy) -> Vec<String> {
    cols.iter()
        .map(|c| {
            let v = record.get(c).unwrap_or(&Value::Null);
            match strategy {
                DedupStrategy::Exact => v.key(false),
                DedupStrategy::Fuzzy => fuzzy_key(v),
            }
        })
        .collect()
}

/// Remove duplicates, keeping the first or last occurrence of each key.
/// Survivors keep their original relative order.
///
/// # Errors
///
/// Data error when a configured column is absent from the dataset.
pub fn deduplicate(dataset: &[Record], config: &DeduplicateConfig) -> Result<TransformOutput> {
    let cols = match &config.columns {
        Some(sel) => {
            let names = sel.names("columns")?;
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            require_columns(dataset, &refs)?;
            names
        }
        None => columns(dataset),
    };

    let mut seen = HashSet::new();
    let mut keep = vec![false; dataset.len()];
    let order: Box<dyn Iterator<Item = usize>> = match config.keep {
        Keep::First => Box::new(0..dataset.len()),
        Keep::Last => Box::new((0..dataset.len()).rev()),
    };
    for i in order {
        if seen.insert(record_key(&dataset[i], &cols, config.strategy)) {
            keep[i] = true;
        }
    }

    let data: Vec<Record> = dataset
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(r, _)| r.clone())
        .collect();
    let duplicates_removed = dataset.len() - data.len();
    tracing::debug!(duplicates_removed, "deduplicate complete");

    Ok(TransformOutput::new(
        dataset.len(),
        data,
        OperatorDetails::Deduplicate {
            strategy: match config.strategy {
                DedupStrategy::Exact => "exact".into(),
                DedupStrategy::Fuzzy => "fuzzy".into(),
            },
            duplicates_removed,
        },
    ))
}
