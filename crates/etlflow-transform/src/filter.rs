//! FILTER: keep records matching a list of conditions.

use std::cmp::Ordering;

use etlflow_types::{Record, Value};
use serde::{Deserialize, Serialize};

use crate::config::ensure_non_empty_column;
use crate::error::{Result, TransformError};
use crate::output::{OperatorDetails, TransformOutput};
use crate::require_columns;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    fn check(&self) -> Result<()> {
        ensure_non_empty_column(&self.column, "conditions")?;
        match self.operator {
            FilterOperator::In | FilterOperator::NotIn => {
                if !matches!(self.value, Value::List(_)) {
                    return Err(TransformError::config(format!(
                        "operator on '{}' requires a list value",
                        self.column
                    )));
                }
            }
            FilterOperator::IsNull | FilterOperator::IsNotNull => {}
            _ => {
                if self.value.is_null() {
                    return Err(TransformError::config(format!(
                        "condition on '{}' requires a value",
                        self.column
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether `record` satisfies the condition. Any comparison involving a
    /// null cell is false, except `is_null`.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let cell = record.get(&self.column).unwrap_or(&Value::Null);
        if cell.is_null() {
            return self.operator == FilterOperator::IsNull;
        }
        let ord = || cell.compare(&self.value);
        match self.operator {
            FilterOperator::IsNull => false,
            FilterOperator::IsNotNull => true,
            FilterOperator::Equals => cell.loose_eq(&self.value),
            FilterOperator::NotEquals => !cell.loose_eq(&self.value),
            FilterOperator::GreaterThan => ord() == Some(Ordering::Greater),
            FilterOperator::GreaterThanOrEqual => {
                matches!(ord(), Some(Ordering::Greater | Ordering::Equal))
            }
            FilterOperator::LessThan => ord() == Some(Ordering::Less),
            FilterOperator::LessThanOrEqual => {
                matches!(ord(), Some(Ordering::Less | Ordering::Equal))
            }
            FilterOperator::Contains => cell.to_string().contains(&self.value.to_string()),
            FilterOperator::NotContains => !cell.to_string().contains(&self.value.to_string()),
            FilterOperator::StartsWith => cell.to_string().starts_with(&self.value.to_string()),
            FilterOperator::EndsWith => cell.to_string().ends_with(&self.value.to_string()),
            FilterOperator::In => self.in_list(cell),
            FilterOperator::NotIn => !self.in_list(cell),
        }
    }

    fn in_list(&self, cell: &Value) -> bool {
        match &self.value {
            Value::List(items) => items.iter().any(|v| cell.loose_eq(v)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: Logic,
}

impl FilterConfig {
    pub(crate) fn check(&self) -> Result<()> {
        self.conditions.iter().try_for_each(Condition::check)
    }

    /// Whether a record passes all (`and`) or any (`or`) conditions. An
    /// empty condition list passes everything.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        match self.logic {
            Logic::And => self.conditions.iter().all(|c| c.matches(record)),
            Logic::Or => self.conditions.iter().any(|c| c.matches(record)),
        }
    }
}

/// Keep the records that satisfy the conditions, in input order.
///
/// # Errors
///
/// Config error for malformed conditions; data error when a condition's
/// column is absent from a non-empty dataset.
pub fn filter(dataset: &[Record], config: &FilterConfig) -> Result<TransformOutput> {
    config.check()?;
    let cols: Vec<&str> = config.conditions.iter().map(|c| c.column.as_str()).collect();
    require_columns(dataset, &cols)?;

    let data: Vec<Record> = dataset
        .iter()
        .filter(|r| config.matches(r))
        .cloned()
        .collect();
    let filtered_out = dataset.len() - data.len();
    tracing::debug!(filtered_out, "filter complete");
    Ok(TransformOutput::new(
        dataset.len(),
        data,
        OperatorDetails::Filter { filtered_out },
    ))
}
