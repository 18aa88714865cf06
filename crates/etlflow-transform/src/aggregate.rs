//! AGGREGATE: group records and reduce columns.

use std::collections::{BTreeMap, HashMap};

use etlflow_types::{Record, Value};
use serde::{Deserialize, Serialize};

use crate::config::{ensure_non_empty_column, ColumnSelector};
use crate::error::{Result, TransformError};
use crate::output::{OperatorDetails, TransformOutput};
use crate::require_columns;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Sum,
    Count,
    Mean,
    Avg,
    Min,
    Max,
    Std,
    Var,
    Median,
}

impl AggregateFn {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Mean => "mean",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Std => "std",
            Self::Var => "var",
            Self::Median => "median",
        }
    }

    fn needs_numbers(self) -> bool {
        !matches!(self, Self::Count | Self::Min | Self::Max)
    }
}

/// One function or a list of functions for a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FnSelector {
    One(AggregateFn),
    Many(Vec<AggregateFn>),
}

impl FnSelector {
    fn functions(&self) -> Vec<AggregateFn> {
        match self {
            Self::One(f) => vec![*f],
            Self::Many(fs) => fs.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateConfig {
    #[serde(default)]
    pub group_by: Option<ColumnSelector>,
    pub aggregations: BTreeMap<String, FnSelector>,
}

impl AggregateConfig {
    pub(crate) fn check(&self) -> Result<()> {
        if let Some(g) = &self.group_by {
            g.names("group_by")?;
        }
        if self.aggregations.is_empty() {
            return Err(TransformError::config("aggregations must not be empty"));
        }
        for (column, fns) in &self.aggregations {
            ensure_non_empty_column(column, "aggregations")?;
            if fns.functions().is_empty() {
                return Err(TransformError::config(format!(
                    "aggregations for '{column}' must list at least one function"
                )));
            }
        }
        Ok(())
    }
}

/// Non-null values of one column within one group, with their row numbers.
type Cells<'a> = Vec<(usize, &'a Value)>;

#[allow(clippy::cast_precision_loss)]
fn numbers(column: &str, cells: &Cells<'_>) -> Result<Vec<f64>> {
    cells
        .iter()
        .map(|(row, v)| {
            v.as_f64().ok_or_else(|| {
                TransformError::at_row(
                    column,
                    *row,
                    format!("expected a number, got {}", v.type_name()),
                )
            })
        })
        .collect()
}

fn sum(cells: &Cells<'_>, nums: &[f64]) -> Value {
    let mut total: Option<i64> = Some(0);
    for (_, v) in cells {
        total = match (total, v) {
            (Some(t), Value::Int(i)) => t.checked_add(*i),
            _ => None,
        };
    }
    total.map_or_else(|| Value::Float(nums.iter().sum()), Value::Int)
}

#[allow(clippy::cast_precision_loss)]
fn variance(nums: &[f64]) -> Option<f64> {
    if nums.len() < 2 {
        return None;
    }
    let n = nums.len() as f64;
    let mean = nums.iter().sum::<f64>() / n;
    Some(nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0))
}

fn median(nums: &[f64]) -> Option<f64> {
    if nums.is_empty() {
        return None;
    }
    let mut sorted = nums.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[allow(clippy::cast_precision_loss)]
fn apply(func: AggregateFn, column: &str, cells: &Cells<'_>) -> Result<Value> {
    let nums = if func.needs_numbers() {
        numbers(column, cells)?
    } else {
        Vec::new()
    };
    let value = match func {
        AggregateFn::Count => Value::Int(i64::try_from(cells.len()).unwrap_or(i64::MAX)),
        AggregateFn::Sum => sum(cells, &nums),
        AggregateFn::Mean | AggregateFn::Avg => {
            if nums.is_empty() {
                Value::Null
            } else {
                Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggregateFn::Min => cells
            .iter()
            .map(|(_, v)| *v)
            .min_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or_default(),
        AggregateFn::Max => cells
            .iter()
            .map(|(_, v)| *v)
            .max_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or_default(),
        AggregateFn::Var => variance(&nums).map_or(Value::Null, Value::Float),
        AggregateFn::Std => variance(&nums).map_or(Value::Null, |v| Value::Float(v.sqrt())),
        AggregateFn::Median => median(&nums).map_or(Value::Null, Value::Float),
    };
    Ok(value)
}

struct Group<'a> {
    keys: Vec<Value>,
    rows: Vec<(usize, &'a Record)>,
}

/// Group by the configured columns and compute each aggregation.
///
/// Without `group_by` the whole dataset is one group and exactly one record
/// is produced, even for empty input.
///
/// # Errors
///
/// Data error for a missing column or a non-numeric value fed to a numeric
/// function.
pub fn aggregate(dataset: &[Record], config: &AggregateConfig) -> Result<TransformOutput> {
    config.check()?;
    let group_cols = match &config.group_by {
        Some(g) => g.names("group_by")?,
        None => Vec::new(),
    };
    let group_refs: Vec<&str> = group_cols.iter().map(String::as_str).collect();
    require_columns(dataset, &group_refs)?;
    let agg_refs: Vec<&str> = config.aggregations.keys().map(String::as_str).collect();
    require_columns(dataset, &agg_refs)?;

    let mut groups: Vec<Group<'_>> = Vec::new();
    if group_cols.is_empty() {
        groups.push(Group {
            keys: Vec::new(),
            rows: dataset.iter().enumerate().collect(),
        });
    } else {
        let mut positions: HashMap<Vec<String>, usize> = HashMap::new();
        for (row, record) in dataset.iter().enumerate() {
            let keys: Vec<Value> = group_cols
                .iter()
                .map(|c| record.get(c).cloned().unwrap_or_default())
                .collect();
            let hash_key: Vec<String> = keys.iter().map(|v| v.key(true)).collect();
            let pos = *positions.entry(hash_key).or_insert_with(|| {
                groups.push(Group {
                    keys,
                    rows: Vec::new(),
                });
                groups.len() - 1
            });
            groups[pos].rows.push((row, record));
        }
    }

    let mut data = Vec::with_capacity(groups.len());
    for group in &groups {
        let mut out = Record::new();
        for (col, key) in group_cols.iter().zip(&group.keys) {
            out.insert(col.clone(), key.clone());
        }
        for (column, selector) in &config.aggregations {
            let cells: Cells<'_> = group
                .rows
                .iter()
                .filter_map(|(row, r)| r.get(column).filter(|v| !v.is_null()).map(|v| (*row, v)))
                .collect();
            let fns = selector.functions();
            for func in &fns {
                let name = if fns.len() == 1 {
                    column.clone()
                } else {
                    format!("{column}_{}", func.as_str())
                };
                out.insert(name, apply(*func, column, &cells)?);
            }
        }
        data.push(out);
    }

    tracing::debug!(groups = groups.len(), "aggregate complete");
    let groups = data.len();
    Ok(TransformOutput::new(
        dataset.len(),
        data,
        OperatorDetails::Aggregate { groups },
    ))
}
