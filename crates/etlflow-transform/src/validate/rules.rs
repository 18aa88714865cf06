//! Rule specs, compilation, and per-record checks.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use etlflow_types::{Record, Value};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{ensure_non_empty_column, ColumnSelector};
use crate::error::{Result, TransformError};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("valid email regex")
});

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("valid url regex"));

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9\s\-().]{7,20}$").expect("valid phone regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    NotNull,
    Unique,
    Range,
    DataType,
    Pattern,
}

impl RuleType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotNull => "not_null",
            Self::Unique => "unique",
            Self::Range => "range",
            Self::DataType => "data_type",
            Self::Pattern => "pattern",
        }
    }
}

/// One rule as written in a pipeline file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ColumnsSpec {
    columns: ColumnSelector,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeSpec {
    column: String,
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DataTypeSpec {
    column: String,
    expected: ExpectedType,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatternSpec {
    column: String,
    pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Email,
    Url,
    Phone,
}

impl ExpectedType {
    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Email => "email",
            Self::Url => "url",
            Self::Phone => "phone",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (Self::String, Value::Text(_))
            | (Self::Integer, Value::Int(_))
            | (Self::Number, Value::Int(_) | Value::Float(_))
            | (Self::Boolean, Value::Bool(_))
            | (Self::Date, Value::Date(_) | Value::Timestamp(_)) => true,
            (Self::Integer, Value::Float(f)) => f.is_finite() && f.fract() == 0.0,
            (Self::Date, Value::Text(s)) => {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").is_ok()
                    || DateTime::parse_from_rfc3339(s.trim()).is_ok()
            }
            (Self::Email, Value::Text(s)) => EMAIL_RE.is_match(s.trim()),
            (Self::Url, Value::Text(s)) => URL_RE.is_match(s.trim()),
            (Self::Phone, Value::Text(s)) => {
                PHONE_RE.is_match(s.trim()) && s.chars().filter(char::is_ascii_digit).count() >= 7
            }
            _ => false,
        }
    }
}

/// Why a record failed a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationReason {
    Null { column: String },
    Duplicate { value: String },
    OutOfRange { value: f64, min: Option<f64>, max: Option<f64> },
    NotNumeric { found: String },
    WrongType { expected: String, found: String },
    PatternMismatch { value: String, pattern: String },
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null { column } => write!(f, "value of '{column}' is null or empty"),
            Self::Duplicate { value } => write!(f, "duplicate value {value}"),
            Self::OutOfRange { value, min, max } => {
                let lo = min.map_or_else(|| "-inf".to_string(), |m| m.to_string());
                let hi = max.map_or_else(|| "inf".to_string(), |m| m.to_string());
                write!(f, "value {value} outside bounds [{lo}, {hi}]")
            }
            Self::NotNumeric { found } => write!(f, "expected a number, got {found}"),
            Self::WrongType { expected, found } => {
                write!(f, "expected {expected}, got {found}")
            }
            Self::PatternMismatch { value, pattern } => {
                write!(f, "value '{value}' does not match {pattern}")
            }
        }
    }
}

/// Checked, ready-to-evaluate form of a rule.
#[derive(Debug, Clone)]
pub enum CompiledCheck {
    NotNull { columns: Vec<String> },
    Unique { columns: Vec<String> },
    Range { column: String, min: Option<f64>, max: Option<f64> },
    DataType { column: String, expected: ExpectedType },
    Pattern { column: String, pattern: String, regex: Regex },
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub check: CompiledCheck,
}

fn rule_config<T: DeserializeOwned>(spec: &RuleSpec) -> Result<T> {
    let raw = if spec.config.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        spec.config.clone()
    };
    serde_json::from_value(raw).map_err(|e| {
        TransformError::config(format!(
            "rule '{}' ({}) config: {e}",
            spec.name,
            spec.rule_type.as_str()
        ))
    })
}

impl RuleSpec {
    /// Validate the rule's config and precompile what can be precompiled.
    ///
    /// # Errors
    ///
    /// Config error for a blank name, a malformed config, an invalid regex,
    /// a range without bounds, or `min > max`.
    pub fn compile(&self) -> Result<CompiledRule> {
        if self.name.trim().is_empty() {
            return Err(TransformError::config("rule name must not be empty"));
        }
        let what = format!("rule '{}'", self.name);
        let check = match self.rule_type {
            RuleType::NotNull => {
                let spec: ColumnsSpec = rule_config(self)?;
                CompiledCheck::NotNull {
                    columns: spec.columns.names(&what)?,
                }
            }
            RuleType::Unique => {
                let spec: ColumnsSpec = rule_config(self)?;
                CompiledCheck::Unique {
                    columns: spec.columns.names(&what)?,
                }
            }
            RuleType::Range => {
                let spec: RangeSpec = rule_config(self)?;
                ensure_non_empty_column(&spec.column, &what)?;
                if spec.min.is_none() && spec.max.is_none() {
                    return Err(TransformError::config(format!(
                        "{what} must set min and/or max"
                    )));
                }
                if let (Some(lo), Some(hi)) = (spec.min, spec.max) {
                    if lo > hi {
                        return Err(TransformError::config(format!(
                            "{what} has min > max ({lo} > {hi})"
                        )));
                    }
                }
                CompiledCheck::Range {
                    column: spec.column,
                    min: spec.min,
                    max: spec.max,
                }
            }
            RuleType::DataType => {
                let spec: DataTypeSpec = rule_config(self)?;
                ensure_non_empty_column(&spec.column, &what)?;
                CompiledCheck::DataType {
                    column: spec.column,
                    expected: spec.expected,
                }
            }
            RuleType::Pattern => {
                let spec: PatternSpec = rule_config(self)?;
                ensure_non_empty_column(&spec.column, &what)?;
                if spec.pattern.trim().is_empty() {
                    return Err(TransformError::config(format!(
                        "{what} pattern must not be empty"
                    )));
                }
                let regex = Regex::new(&spec.pattern).map_err(|e| {
                    TransformError::config(format!("{what} has invalid pattern: {e}"))
                })?;
                CompiledCheck::Pattern {
                    column: spec.column,
                    pattern: spec.pattern,
                    regex,
                }
            }
        };
        Ok(CompiledRule {
            name: self.name.clone(),
            rule_type: self.rule_type,
            severity: self.severity,
            check,
        })
    }
}

/// Per-dataset state some checks need (value counts for `unique`).
#[derive(Debug, Default)]
pub struct DatasetContext {
    counts: HashMap<String, usize>,
}

fn unique_key(record: &Record, columns: &[String]) -> Option<String> {
    let cells: Vec<&Value> = columns
        .iter()
        .map(|c| record.get(c).unwrap_or(&Value::Null))
        .collect();
    if cells.iter().all(|v| v.is_null()) {
        return None;
    }
    Some(
        cells
            .iter()
            .map(|v| v.key(false))
            .collect::<Vec<_>>()
            .join("\u{1f}"),
    )
}

impl CompiledRule {
    /// Build the dataset-wide context this rule needs before checking rows.
    #[must_use]
    pub fn prepare(&self, dataset: &[Record]) -> DatasetContext {
        let mut ctx = DatasetContext::default();
        if let CompiledCheck::Unique { columns } = &self.check {
            for record in dataset {
                if let Some(key) = unique_key(record, columns) {
                    *ctx.counts.entry(key).or_default() += 1;
                }
            }
        }
        ctx
    }

    /// Column(s) this rule looks at, for violation reports.
    #[must_use]
    pub fn column_label(&self) -> String {
        match &self.check {
            CompiledCheck::NotNull { columns } | CompiledCheck::Unique { columns } => {
                columns.join(",")
            }
            CompiledCheck::Range { column, .. }
            | CompiledCheck::DataType { column, .. }
            | CompiledCheck::Pattern { column, .. } => column.clone(),
        }
    }

    /// Evaluate the rule against one record.
    ///
    /// Null and missing cells pass every rule except `not_null`.
    ///
    /// # Errors
    ///
    /// Returns the violation when the record fails the rule.
    pub fn check(&self, record: &Record, ctx: &DatasetContext) -> std::result::Result<(), ViolationReason> {
        match &self.check {
            CompiledCheck::NotNull { columns } => {
                for column in columns {
                    if record.get(column).map_or(true, Value::is_blank) {
                        return Err(ViolationReason::Null {
                            column: column.clone(),
                        });
                    }
                }
                Ok(())
            }
            CompiledCheck::Unique { columns } => match unique_key(record, columns) {
                Some(key) if ctx.counts.get(&key).copied().unwrap_or_default() > 1 => {
                    let rendered: Vec<String> = columns
                        .iter()
                        .map(|c| record.get(c).unwrap_or(&Value::Null).to_string())
                        .collect();
                    Err(ViolationReason::Duplicate {
                        value: rendered.join(", "),
                    })
                }
                _ => Ok(()),
            },
            CompiledCheck::Range { column, min, max } => {
                let Some(value) = present(record, column) else {
                    return Ok(());
                };
                let Some(n) = value.as_f64() else {
                    return Err(ViolationReason::NotNumeric {
                        found: value.type_name().to_string(),
                    });
                };
                if !n.is_finite()
                    || min.is_some_and(|lo| n < lo)
                    || max.is_some_and(|hi| n > hi)
                {
                    return Err(ViolationReason::OutOfRange {
                        value: n,
                        min: *min,
                        max: *max,
                    });
                }
                Ok(())
            }
            CompiledCheck::DataType { column, expected } => {
                let Some(value) = present(record, column) else {
                    return Ok(());
                };
                if expected.matches(value) {
                    Ok(())
                } else {
                    Err(ViolationReason::WrongType {
                        expected: expected.as_str().to_string(),
                        found: value.type_name().to_string(),
                    })
                }
            }
            CompiledCheck::Pattern {
                column,
                pattern,
                regex,
            } => {
                let Some(value) = present(record, column) else {
                    return Ok(());
                };
                let text = value.to_string();
                if regex.is_match(&text) {
                    Ok(())
                } else {
                    Err(ViolationReason::PatternMismatch {
                        value: text,
                        pattern: pattern.clone(),
                    })
                }
            }
        }
    }
}

fn present<'a>(record: &'a Record, column: &str) -> Option<&'a Value> {
    record.get(column).filter(|v| !v.is_null())
}
