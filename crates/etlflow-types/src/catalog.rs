//! Source schema description.
//!
//! A [`SchemaInfo`] is what a source reports about the dataset it exposes:
//! one [`ColumnInfo`] per column plus an optional row count. Sources without
//! a declared schema can derive one from sample rows via [`infer_schema`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::{Record, Value};

/// Column type as observed in data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferredType {
    Boolean,
    Integer,
    Float,
    String,
    Date,
    Timestamp,
    List,
    /// Only nulls observed.
    Unknown,
    /// Conflicting non-null kinds observed.
    Mixed,
}

impl InferredType {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Int(_) => Some(Self::Integer),
            Value::Float(_) => Some(Self::Float),
            Value::Text(_) => Some(Self::String),
            Value::Date(_) => Some(Self::Date),
            Value::Timestamp(_) => Some(Self::Timestamp),
            Value::List(_) => Some(Self::List),
        }
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unknown, t) | (t, Self::Unknown) => t,
            (a, b) if a == b => a,
            (Self::Integer, Self::Float) | (Self::Float, Self::Integer) => Self::Float,
            _ => Self::Mixed,
        }
    }
}

/// Column definition within a source schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub inferred_type: InferredType,
    pub nullable: bool,
}

/// Schema reported by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub columns: Vec<ColumnInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

/// Infer column types from a sample. A column absent from some records is
/// nullable.
#[must_use]
pub fn infer_schema(rows: &[Record]) -> SchemaInfo {
    let mut seen: BTreeMap<&str, (InferredType, usize, bool)> = BTreeMap::new();
    for row in rows {
        for (name, value) in row {
            let entry = seen
                .entry(name.as_str())
                .or_insert((InferredType::Unknown, 0, false));
            entry.1 += 1;
            match InferredType::of(value) {
                Some(t) => entry.0 = entry.0.merge(t),
                None => entry.2 = true,
            }
        }
    }
    let columns = seen
        .into_iter()
        .map(|(name, (inferred_type, count, had_null))| ColumnInfo {
            name: name.to_string(),
            inferred_type,
            nullable: had_null || count < rows.len(),
        })
        .collect();
    SchemaInfo {
        columns,
        row_count: Some(rows.len() as u64),
    }
}
