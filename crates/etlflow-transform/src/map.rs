//! MAP: select, exclude, and rename columns, in that order.

use std::collections::{BTreeMap, BTreeSet};

use etlflow_types::value::columns;
use etlflow_types::Record;
use serde::{Deserialize, Serialize};

use crate::config::ensure_non_empty_column;
use crate::error::{Result, TransformError};
use crate::output::{OperatorDetails, TransformOutput};
use crate::require_columns;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapConfig {
    #[serde(default)]
    pub select: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
    /// Old name to new name.
    #[serde(default)]
    pub rename: Option<BTreeMap<String, String>>,
}

impl MapConfig {
    pub(crate) fn check(&self) -> Result<()> {
        for name in self.select.iter().chain(&self.exclude).flatten() {
            ensure_non_empty_column(name, "map")?;
        }
        if let Some(rename) = &self.rename {
            let mut targets = BTreeSet::new();
            for (from, to) in rename {
                ensure_non_empty_column(from, "rename")?;
                ensure_non_empty_column(to, "rename")?;
                if !targets.insert(to.as_str()) {
                    return Err(TransformError::config(format!(
                        "rename maps more than one column to '{to}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Reshape columns.
///
/// # Errors
///
/// Data error for a selected or renamed column absent from a non-empty
/// dataset; config error when a rename target collides with a column that
/// is kept.
pub fn map(dataset: &[Record], config: &MapConfig) -> Result<TransformOutput> {
    config.check()?;
    if let Some(select) = &config.select {
        let refs: Vec<&str> = select.iter().map(String::as_str).collect();
        require_columns(dataset, &refs)?;
    }

    let mut data: Vec<Record> = dataset
        .iter()
        .map(|r| {
            let mut out: Record = match &config.select {
                Some(select) => select
                    .iter()
                    .map(|c| (c.clone(), r.get(c).cloned().unwrap_or_default()))
                    .collect(),
                None => r.clone(),
            };
            for c in config.exclude.iter().flatten() {
                out.remove(c);
            }
            out
        })
        .collect();

    if let Some(rename) = &config.rename {
        let present = columns(&data);
        let present: BTreeSet<&str> = present.iter().map(String::as_str).collect();
        if !data.is_empty() {
            if let Some(missing) = rename.keys().find(|k| !present.contains(k.as_str())) {
                return Err(TransformError::missing_column(missing));
            }
        }
        for to in rename.values() {
            if present.contains(to.as_str()) && !rename.contains_key(to) {
                return Err(TransformError::config(format!(
                    "rename target '{to}' collides with an existing column"
                )));
            }
        }
        for record in &mut data {
            let moved: Vec<_> = rename
                .iter()
                .filter_map(|(from, to)| record.remove(from).map(|v| (to.clone(), v)))
                .collect();
            record.extend(moved);
        }
    }

    let cols = columns(&data);
    Ok(TransformOutput::new(
        dataset.len(),
        data,
        OperatorDetails::Map { columns: cols },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etlflow_types::value::record;
    use etlflow_types::Value;
    use serde_json::json;

    fn rows() -> Vec<Record> {
        vec![record([("a", 1), ("b", 2), ("c", 3)])]
    }

    fn cfg(v: serde_json::Value) -> MapConfig {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn select_then_exclude_then_rename() {
        let out = map(
            &rows(),
            &cfg(json!({"select": ["a", "b"], "exclude": ["b"], "rename": {"a": "alpha"}})),
        )
        .unwrap();
        assert_eq!(out.data, vec![record([("alpha", Value::Int(1))])]);
    }

    #[test]
    fn swap_rename_is_allowed() {
        let out = map(&rows(), &cfg(json!({"rename": {"a": "b", "b": "a"}}))).unwrap();
        assert_eq!(out.data[0]["a"], Value::Int(2));
        assert_eq!(out.data[0]["b"], Value::Int(1));
    }

    #[test]
    fn rename_collision_is_config_error() {
        let err = map(&rows(), &cfg(json!({"rename": {"a": "c"}}))).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn missing_columns_are_data_errors() {
        assert!(!map(&rows(), &cfg(json!({"select": ["z"]}))).unwrap_err().is_config());
        assert!(!map(&rows(), &cfg(json!({"rename": {"z": "y"}}))).unwrap_err().is_config());
    }
}
