//! Dynamic cell values, records, and datasets.
//!
//! Data in flight between pipeline steps is row-oriented: a [`Dataset`] is an
//! ordered list of [`Record`]s, each mapping column names to a [`Value`].
//! Values serialize as plain JSON so datasets can be checkpointed, cached,
//! and written to newline-delimited JSON files without a wrapper format.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single dynamically typed cell.
///
/// Deserialization goes through [`serde_json::Value`]: strings always become
/// [`Value::Text`] and JSON objects are kept as their compact JSON text.
/// `Date` and `Timestamp` are produced by connectors that know column types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
}

/// One row: column name to value.
pub type Record = BTreeMap<String, Value>;

/// Ordered collection of records flowing between steps.
pub type Dataset = Vec<Record>;

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Null, or text that is empty after trimming.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric view of `Int` and `Float` values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Short type label used in error messages and schema inference.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "string",
            Self::Date(_) => "date",
            Self::Timestamp(_) => "timestamp",
            Self::List(_) => "list",
        }
    }

    /// Partial comparison used by filter predicates.
    ///
    /// Numbers compare across `Int`/`Float`; dates and timestamps also
    /// compare against text holding an ISO-8601 rendering. Everything else
    /// only compares within its own kind. Null never compares.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Text(b)) => parse_date(b).map(|b| a.cmp(&b)),
            (Self::Text(a), Self::Date(b)) => parse_date(a).map(|a| a.cmp(b)),
            (Self::Timestamp(a), Self::Text(b)) => parse_timestamp(b).map(|b| a.cmp(&b)),
            (Self::Text(a), Self::Timestamp(b)) => parse_timestamp(a).map(|a| a.cmp(b)),
            _ => None,
        }
    }

    /// Equality with numeric and date coercion (`1 == 1.0`).
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Total order for sorting. Callers decide where nulls go; here null
    /// sorts after every other kind.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        if let Some(ordering) = self.compare(other) {
            return ordering;
        }
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                let a = self.as_f64().unwrap_or(f64::NAN);
                let b = other.as_f64().unwrap_or(f64::NAN);
                a.total_cmp(&b)
            }
            (Self::List(a), Self::List(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.sort_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) | Self::Float(_) => 1,
            Self::Text(_) => 2,
            Self::Date(_) => 3,
            Self::Timestamp(_) => 4,
            Self::List(_) => 5,
            Self::Null => 6,
        }
    }

    /// Canonical key used for hashing rows into groups.
    ///
    /// The rendering is type-tagged so `Int(1)` and `Text("1")` never
    /// collide. With `normalize_numbers`, integral floats share the key of
    /// the equivalent integer.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn key(&self, normalize_numbers: bool) -> String {
        match self {
            Self::Null => "n".to_string(),
            Self::Bool(b) => format!("b:{b}"),
            Self::Int(i) => {
                if normalize_numbers {
                    format!("num:{i}")
                } else {
                    format!("i:{i}")
                }
            }
            Self::Float(f) => {
                if normalize_numbers {
                    if f.fract() == 0.0 && f.abs() < 9.0e15 {
                        format!("num:{}", *f as i64)
                    } else {
                        format!("num:{f}")
                    }
                } else {
                    format!("f:{f}")
                }
            }
            Self::Text(s) => format!("s:{s}"),
            Self::Date(d) => format!("d:{d}"),
            Self::Timestamp(t) => format!("t:{}", t.to_rfc3339()),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.key(normalize_numbers)).collect();
                format!("l:[{}]", inner.join(","))
            }
        }
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{d}"),
            Self::Timestamp(t) => f.write_str(&t.to_rfc3339()),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => Self::Text(serde_json::Value::Object(map).to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Build a record from `(column, value)` pairs.
pub fn record<I, K, V>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Decode a JSON array of objects into a dataset.
///
/// # Errors
///
/// Returns a message when the input is not an array of objects.
pub fn dataset_from_json(value: &serde_json::Value) -> Result<Dataset, String> {
    let rows = value
        .as_array()
        .ok_or_else(|| format!("expected an array of records, got {value}"))?;
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let object = row
                .as_object()
                .ok_or_else(|| format!("record {index} is not an object"))?;
            Ok(object
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                .collect())
        })
        .collect()
}

/// Union of column names across all records, sorted.
#[must_use]
pub fn columns(dataset: &[Record]) -> Vec<String> {
    let set: BTreeSet<&String> = dataset.iter().flat_map(BTreeMap::keys).collect();
    set.into_iter().cloned().collect()
}

/// Whether `column` exists in any record.
#[must_use]
pub fn has_column(dataset: &[Record], column: &str) -> bool {
    dataset.iter().any(|r| r.contains_key(column))
}

/// Give every record the same key set, filling gaps with [`Value::Null`].
pub fn normalize_schema(dataset: &mut [Record]) {
    let all = columns(dataset);
    for record in dataset.iter_mut() {
        for column in &all {
            record.entry(column.clone()).or_insert(Value::Null);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_numbers_prefer_int() {
        let v: Value = serde_json::from_str("5").unwrap();
        assert_eq!(v, Value::Int(5));
        let v: Value = serde_json::from_str("5.5").unwrap();
        assert_eq!(v, Value::Float(5.5));
    }

    #[test]
    fn json_objects_become_text() {
        let v: Value = serde_json::from_str(r#"{"a":1}"#).unwrap();
        assert_eq!(v, Value::Text(r#"{"a":1}"#.to_string()));
    }

    #[test]
    fn date_serializes_as_iso_string() {
        let v = Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"2024-03-01\"");
    }

    #[test]
    fn compare_crosses_numeric_kinds() {
        assert_eq!(Value::Int(2).compare(&Value::Float(1.5)), Some(Ordering::Greater));
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
    }

    #[test]
    fn compare_date_against_text() {
        let d = Value::Date(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        assert_eq!(d.compare(&Value::from("2024-01-01")), Some(Ordering::Greater));
        assert_eq!(d.compare(&Value::from("not a date")), None);
    }

    #[test]
    fn key_is_type_tagged() {
        assert_ne!(Value::Int(1).key(false), Value::from("1").key(false));
        assert_ne!(Value::Int(1).key(false), Value::Float(1.0).key(false));
        assert_eq!(Value::Int(1).key(true), Value::Float(1.0).key(true));
    }

    #[test]
    fn blank_detection() {
        assert!(Value::Null.is_blank());
        assert!(Value::from("   ").is_blank());
        assert!(!Value::from("x").is_blank());
        assert!(!Value::Int(0).is_blank());
    }

    #[test]
    fn normalize_schema_fills_missing_columns() {
        let mut data = vec![record([("a", 1)]), record([("b", 2)])];
        normalize_schema(&mut data);
        assert_eq!(data[0].get("b"), Some(&Value::Null));
        assert_eq!(data[1].get("a"), Some(&Value::Null));
        assert_eq!(columns(&data), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn dataset_from_json_rejects_scalars() {
        let err = dataset_from_json(&serde_json::json!([1, 2])).unwrap_err();
        assert!(err.contains("record 0"));
    }
}
