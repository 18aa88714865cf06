//! JOIN: relational join of two datasets on key columns.

use std::collections::{BTreeSet, HashMap};

use etlflow_types::value::columns;
use etlflow_types::{Dataset, Record, Value};
use serde::{Deserialize, Serialize};

use crate::config::ColumnSelector;
use crate::error::{Result, TransformError};
use crate::output::{OperatorDetails, TransformOutput};
use crate::require_columns;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinHow {
    #[default]
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinHow {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inner => "inner",
            Self::Left => "left",
            Self::Right => "right",
            Self::Outer => "outer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinConfig {
    /// Name of the dataset used as the right side inside a pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
    pub left_on: ColumnSelector,
    pub right_on: ColumnSelector,
    #[serde(default)]
    pub how: JoinHow,
    #[serde(default = "default_suffixes", alias = "suffix")]
    pub suffixes: (String, String),
}

fn default_suffixes() -> (String, String) {
    ("_x".to_string(), "_y".to_string())
}

impl JoinConfig {
    /// Key columns as `(left, right)` pairs.
    ///
    /// # Errors
    ///
    /// Config error when either side is empty or the arities differ.
    pub fn key_pairs(&self) -> Result<Vec<(String, String)>> {
        let left = self.left_on.names("left_on")?;
        let right = self.right_on.names("right_on")?;
        if left.len() != right.len() {
            return Err(TransformError::config(format!(
                "left_on has {} column(s) but right_on has {}",
                left.len(),
                right.len()
            )));
        }
        if self.suffixes.0 == self.suffixes.1 {
            return Err(TransformError::config("suffixes must differ"));
        }
        Ok(left.into_iter().zip(right).collect())
    }
}

/// Output column naming, computed once from both schemas.
struct Layout {
    /// (source column, output column) for the left side.
    left: Vec<(String, String)>,
    /// (source column, output column) for the right side; shared keys excluded.
    right: Vec<(String, String)>,
    /// Key columns named the same on both sides; emitted once.
    shared: Vec<String>,
}

impl Layout {
    fn new(left_cols: &[String], right_cols: &[String], pairs: &[(String, String)], suffixes: &(String, String)) -> Self {
        let shared: BTreeSet<&str> = pairs
            .iter()
            .filter(|(l, r)| l == r)
            .map(|(l, _)| l.as_str())
            .collect();
        let left_set: BTreeSet<&str> = left_cols.iter().map(String::as_str).collect();
        let right_set: BTreeSet<&str> = right_cols.iter().map(String::as_str).collect();

        let left = left_cols
            .iter()
            .map(|c| {
                let out = if !shared.contains(c.as_str()) && right_set.contains(c.as_str()) {
                    format!("{c}{}", suffixes.0)
                } else {
                    c.clone()
                };
                (c.clone(), out)
            })
            .collect();
        let right = right_cols
            .iter()
            .filter(|c| !shared.contains(c.as_str()))
            .map(|c| {
                let out = if left_set.contains(c.as_str()) {
                    format!("{c}{}", suffixes.1)
                } else {
                    c.clone()
                };
                (c.clone(), out)
            })
            .collect();
        Self {
            left,
            right,
            shared: shared.into_iter().map(str::to_string).collect(),
        }
    }

    fn combine(&self, left: Option<&Record>, right: Option<&Record>) -> Record {
        let mut out = Record::new();
        for (src, dst) in &self.left {
            let v = left.and_then(|r| r.get(src)).cloned().unwrap_or_default();
            out.insert(dst.clone(), v);
        }
        for (src, dst) in &self.right {
            let v = right.and_then(|r| r.get(src)).cloned().unwrap_or_default();
            out.insert(dst.clone(), v);
        }
        for name in &self.shared {
            let from_left = left.and_then(|r| r.get(name)).filter(|v| !v.is_null());
            let v = from_left
                .or_else(|| right.and_then(|r| r.get(name)))
                .cloned()
                .unwrap_or_default();
            out.insert(name.clone(), v);
        }
        out
    }
}

/// Join key for a record, or `None` when any key cell is null or missing.
fn join_key(record: &Record, cols: &[&str]) -> Option<String> {
    let mut parts = Vec::with_capacity(cols.len());
    for col in cols {
        match record.get(*col) {
            None | Some(Value::Null) => return None,
            Some(v) => parts.push(v.key(true)),
        }
    }
    Some(parts.join("\u{1f}"))
}

fn index(dataset: &[Record], cols: &[&str]) -> HashMap<String, Vec<usize>> {
    let mut idx: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, rec) in dataset.iter().enumerate() {
        if let Some(k) = join_key(rec, cols) {
            idx.entry(k).or_default().push(i);
        }
    }
    idx
}

/// Join `left` with `right`.
///
/// # Errors
///
/// Config errors for bad key lists; a data error when a key column is absent
/// from a non-empty side.
pub fn join(left: &[Record], right: &[Record], config: &JoinConfig) -> Result<TransformOutput> {
    let pairs = config.key_pairs()?;
    let left_keys: Vec<&str> = pairs.iter().map(|(l, _)| l.as_str()).collect();
    let right_keys: Vec<&str> = pairs.iter().map(|(_, r)| r.as_str()).collect();
    require_columns(left, &left_keys)?;
    require_columns(right, &right_keys)?;

    let layout = Layout::new(&columns(left), &columns(right), &pairs, &config.suffixes);
    let right_index = index(right, &right_keys);

    // Matches per left row, in right order.
    let matches: Vec<&[usize]> = left
        .iter()
        .map(|rec| {
            join_key(rec, &left_keys)
                .and_then(|k| right_index.get(&k))
                .map_or(&[][..], Vec::as_slice)
        })
        .collect();

    let mut right_matched = vec![false; right.len()];
    let mut matched_pairs = 0;
    for m in &matches {
        matched_pairs += m.len();
        for &j in *m {
            right_matched[j] = true;
        }
    }
    let left_unmatched = matches.iter().filter(|m| m.is_empty()).count();
    let right_unmatched = right_matched.iter().filter(|m| !**m).count();

    let mut data: Dataset = Vec::new();
    match config.how {
        JoinHow::Inner | JoinHow::Left | JoinHow::Outer => {
            for (i, rec) in left.iter().enumerate() {
                if matches[i].is_empty() {
                    if config.how != JoinHow::Inner {
                        data.push(layout.combine(Some(rec), None));
                    }
                    continue;
                }
                for &j in matches[i] {
                    data.push(layout.combine(Some(rec), Some(&right[j])));
                }
            }
            if config.how == JoinHow::Outer {
                for (j, rec) in right.iter().enumerate() {
                    if !right_matched[j] {
                        data.push(layout.combine(None, Some(rec)));
                    }
                }
            }
        }
        JoinHow::Right => {
            let left_index = index(left, &left_keys);
            for rec in right {
                let hits = join_key(rec, &right_keys).and_then(|k| left_index.get(&k));
                match hits {
                    Some(hits) => {
                        for &i in hits {
                            data.push(layout.combine(Some(&left[i]), Some(rec)));
                        }
                    }
                    None => data.push(layout.combine(None, Some(rec))),
                }
            }
        }
    }

    tracing::debug!(
        how = config.how.as_str(),
        matched_pairs,
        left_unmatched,
        right_unmatched,
        "join complete"
    );

    Ok(TransformOutput::new(
        left.len(),
        data,
        OperatorDetails::Join {
            how: config.how.as_str().to_string(),
            matched_pairs,
            left_unmatched,
            right_unmatched,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etlflow_types::value::record;
    use rstest::rstest;

    fn customers() -> Dataset {
        vec![
            record([("id", Value::Int(1)), ("name", Value::from("Ann"))]),
            record([("id", Value::Int(2)), ("name", Value::from("Bob"))]),
            record([("id", Value::Null), ("name", Value::from("Nobody"))]),
        ]
    }

    fn orders() -> Dataset {
        vec![
            record([("id", Value::Int(1)), ("amount", Value::Int(10)), ("name", Value::from("o1"))]),
            record([("id", Value::Int(1)), ("amount", Value::Int(20)), ("name", Value::from("o2"))]),
            record([("id", Value::Int(3)), ("amount", Value::Int(30)), ("name", Value::from("o3"))]),
            record([("id", Value::Null), ("amount", Value::Int(40)), ("name", Value::from("o4"))]),
        ]
    }

    fn config(how: JoinHow) -> JoinConfig {
        JoinConfig {
            right: None,
            left_on: ColumnSelector::One("id".into()),
            right_on: ColumnSelector::One("id".into()),
            how,
            suffixes: default_suffixes(),
        }
    }

    #[rstest]
    #[case(JoinHow::Inner, 2)]
    #[case(JoinHow::Left, 4)]
    #[case(JoinHow::Right, 4)]
    #[case(JoinHow::Outer, 6)]
    fn row_counts_follow_join_kind(#[case] how: JoinHow, #[case] expected: usize) {
        let out = join(&customers(), &orders(), &config(how)).unwrap();
        assert_eq!(out.data.len(), expected);
        match out.metadata.details {
            OperatorDetails::Join {
                matched_pairs,
                left_unmatched,
                right_unmatched,
                ..
            } => {
                assert_eq!(matched_pairs, 2);
                assert_eq!(left_unmatched, 2);
                assert_eq!(right_unmatched, 2);
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn suffix_is_accepted_as_alias() {
        let cfg: JoinConfig = serde_json::from_value(serde_json::json!({
            "left_on": "id",
            "right_on": "id",
            "suffix": ["_cust", "_ord"],
        }))
        .unwrap();
        assert_eq!(cfg.suffixes, ("_cust".to_string(), "_ord".to_string()));

        let out = join(&customers(), &orders(), &cfg).unwrap();
        assert_eq!(out.data[0].get("name_cust"), Some(&Value::from("Ann")));
        assert_eq!(out.data[0].get("name_ord"), Some(&Value::from("o1")));
    }

    #[test]
    fn collisions_get_suffixes_and_keys_appear_once() {
        let out = join(&customers(), &orders(), &config(JoinHow::Inner)).unwrap();
        let first = &out.data[0];
        assert_eq!(first.get("id"), Some(&Value::Int(1)));
        assert_eq!(first.get("name_x"), Some(&Value::from("Ann")));
        assert_eq!(first.get("name_y"), Some(&Value::from("o1")));
        assert!(!first.contains_key("id_x"));
        assert_eq!(out.data[1].get("amount"), Some(&Value::Int(20)));
    }

    #[test]
    fn null_keys_never_match() {
        let out = join(&customers(), &orders(), &config(JoinHow::Inner)).unwrap();
        assert!(out
            .data
            .iter()
            .all(|r| r.get("name_x") != Some(&Value::from("Nobody"))));
    }

    #[test]
    fn right_join_follows_right_order_and_fills_shared_key() {
        let out = join(&customers(), &orders(), &config(JoinHow::Right)).unwrap();
        let names: Vec<_> = out.data.iter().map(|r| r["name_y"].clone()).collect();
        assert_eq!(
            names,
            vec![Value::from("o1"), Value::from("o2"), Value::from("o3"), Value::from("o4")]
        );
        assert_eq!(out.data[2]["id"], Value::Int(3));
        assert_eq!(out.data[2]["name_x"], Value::Null);
    }

    #[test]
    fn outer_appends_unmatched_right_rows() {
        let out = join(&customers(), &orders(), &config(JoinHow::Outer)).unwrap();
        assert_eq!(out.data[3]["name_x"], Value::from("Nobody"));
        assert_eq!(out.data[4]["name_y"], Value::from("o3"));
        assert_eq!(out.data[5]["name_y"], Value::from("o4"));
    }

    #[test]
    fn differently_named_keys_are_both_kept() {
        let left = vec![record([("cust_id", 1)])];
        let right = vec![record([("customer", 1), ("total", 5)])];
        let cfg = JoinConfig {
            left_on: ColumnSelector::One("cust_id".into()),
            right_on: ColumnSelector::One("customer".into()),
            ..config(JoinHow::Inner)
        };
        let out = join(&left, &right, &cfg).unwrap();
        assert_eq!(out.data[0]["cust_id"], Value::Int(1));
        assert_eq!(out.data[0]["customer"], Value::Int(1));
        assert_eq!(out.data[0]["total"], Value::Int(5));
    }

    #[test]
    fn arity_mismatch_is_config_error() {
        let cfg = JoinConfig {
            right_on: ColumnSelector::Many(vec!["id".into(), "name".into()]),
            ..config(JoinHow::Inner)
        };
        assert!(join(&customers(), &orders(), &cfg).unwrap_err().is_config());
    }

    #[test]
    fn missing_key_column_is_data_error() {
        let cfg = JoinConfig {
            right_on: ColumnSelector::One("order_id".into()),
            ..config(JoinHow::Inner)
        };
        let err = join(&customers(), &orders(), &cfg).unwrap_err();
        assert!(matches!(err, TransformError::Data { .. }));
    }

    #[test]
    fn empty_right_side_keeps_left_rows_for_left_join() {
        let out = join(&customers(), &[], &config(JoinHow::Left)).unwrap();
        assert_eq!(out.data.len(), 3);
        let out = join(&customers(), &[], &config(JoinHow::Inner)).unwrap();
        assert!(out.data.is_empty());
    }
}
