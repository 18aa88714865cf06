//! SORT: stable multi-column ordering with nulls last.

use std::cmp::Ordering;

use etlflow_types::{Record, Value};
use serde::{Deserialize, Serialize};

use crate::config::ensure_non_empty_column;
use crate::error::{Result, TransformError};
use crate::output::{OperatorDetails, TransformOutput};
use crate::require_columns;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortConfig {
    pub columns: Vec<SortKey>,
}

impl SortConfig {
    pub(crate) fn check(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(TransformError::config("columns must not be empty"));
        }
        self.columns
            .iter()
            .try_for_each(|k| ensure_non_empty_column(&k.column, "columns"))
    }
}

fn compare(a: &Record, b: &Record, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let x = a.get(&key.column).unwrap_or(&Value::Null);
        let y = b.get(&key.column).unwrap_or(&Value::Null);
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match key.direction {
                Direction::Asc => x.sort_cmp(y),
                Direction::Desc => y.sort_cmp(x),
            },
        };
        if ord.is_ne() {
            return ord;
        }
    }
    Ordering::Equal
}

/// Sort records by the configured keys.
///
/// # Errors
///
/// Data error when a sort column is absent from a non-empty dataset.
pub fn sort(dataset: &[Record], config: &SortConfig) -> Result<TransformOutput> {
    config.check()?;
    let cols: Vec<&str> = config.columns.iter().map(|k| k.column.as_str()).collect();
    require_columns(dataset, &cols)?;

    let mut data = dataset.to_vec();
    data.sort_by(|a, b| compare(a, b, &config.columns));
    Ok(TransformOutput::new(
        dataset.len(),
        data,
        OperatorDetails::Sort {
            columns: cols.into_iter().map(str::to_string).collect(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etlflow_types::value::record;

    fn rows() -> Vec<Record> {
        vec![
            record([("id", Value::Int(1)), ("score", Value::Int(5)), ("team", Value::from("b"))]),
            record([("id", Value::Int(2)), ("score", Value::Null), ("team", Value::from("a"))]),
            record([("id", Value::Int(3)), ("score", Value::Float(7.5)), ("team", Value::from("a"))]),
            record([("id", Value::Int(4)), ("score", Value::Int(5)), ("team", Value::from("a"))]),
        ]
    }

    fn ids(out: &TransformOutput) -> Vec<Value> {
        out.data.iter().map(|r| r["id"].clone()).collect()
    }

    #[test]
    fn nulls_last_in_both_directions() {
        let cfg = SortConfig {
            columns: vec![SortKey { column: "score".into(), direction: Direction::Asc }],
        };
        let out = sort(&rows(), &cfg).unwrap();
        assert_eq!(ids(&out), vec![Value::Int(1), Value::Int(4), Value::Int(3), Value::Int(2)]);

        let cfg = SortConfig {
            columns: vec![SortKey { column: "score".into(), direction: Direction::Desc }],
        };
        let out = sort(&rows(), &cfg).unwrap();
        assert_eq!(ids(&out), vec![Value::Int(3), Value::Int(1), Value::Int(4), Value::Int(2)]);
    }

    #[test]
    fn secondary_key_breaks_ties() {
        let cfg: SortConfig = serde_json::from_value(serde_json::json!({
            "columns": [{"column": "team"}, {"column": "score", "direction": "desc"}]
        }))
        .unwrap();
        let out = sort(&rows(), &cfg).unwrap();
        assert_eq!(ids(&out), vec![Value::Int(3), Value::Int(4), Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn missing_column_is_data_error() {
        let cfg = SortConfig {
            columns: vec![SortKey { column: "rank".into(), direction: Direction::Asc }],
        };
        assert!(!sort(&rows(), &cfg).unwrap_err().is_config());
    }
}
