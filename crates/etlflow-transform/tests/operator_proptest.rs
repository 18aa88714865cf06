use std::collections::HashMap;

use etlflow_transform::{apply, TransformConfig};
use etlflow_types::value::record;
use etlflow_types::{Record, Value};
use proptest::prelude::*;
use serde_json::json;

fn keyed_rows(keys: &[Option<i64>]) -> Vec<Record> {
    keys.iter()
        .enumerate()
        .map(|(i, k)| {
            record([
                ("k", k.map_or(Value::Null, Value::Int)),
                ("pos", Value::Int(i64::try_from(i).unwrap())),
            ])
        })
        .collect()
}

/// Expected join cardinality computed from key multiplicities.
fn expected_rows(left: &[Option<i64>], right: &[Option<i64>], how: &str) -> usize {
    let mut right_counts: HashMap<i64, usize> = HashMap::new();
    for k in right.iter().flatten() {
        *right_counts.entry(*k).or_default() += 1;
    }
    let mut left_counts: HashMap<i64, usize> = HashMap::new();
    for k in left.iter().flatten() {
        *left_counts.entry(*k).or_default() += 1;
    }
    let matched: usize = left
        .iter()
        .flatten()
        .map(|k| right_counts.get(k).copied().unwrap_or(0))
        .sum();
    let left_unmatched = left
        .iter()
        .filter(|k| k.map_or(true, |k| !right_counts.contains_key(&k)))
        .count();
    let right_unmatched = right
        .iter()
        .filter(|k| k.map_or(true, |k| !left_counts.contains_key(&k)))
        .count();
    match how {
        "inner" => matched,
        "left" => matched + left_unmatched,
        "right" => matched + right_unmatched,
        _ => matched + left_unmatched + right_unmatched,
    }
}

fn key_list() -> impl Strategy<Value = Vec<Option<i64>>> {
    prop::collection::vec(prop::option::weighted(0.85, 0_i64..5), 0..12)
}

proptest! {
    #[test]
    fn join_counts_follow_relational_algebra(
        left in key_list(),
        right in key_list(),
        how in prop::sample::select(vec!["inner", "left", "right", "outer"]),
    ) {
        let cfg = TransformConfig::decode(
            "join",
            json!({"left_on": "k", "right_on": "k", "how": how}),
        ).unwrap();
        let right_rows = keyed_rows(&right);
        let out = apply(&cfg, &keyed_rows(&left), Some(right_rows.as_slice())).unwrap();
        prop_assert_eq!(out.data.len(), expected_rows(&left, &right, how));
    }

    #[test]
    fn exact_dedup_is_idempotent(keys in key_list(), on_key in any::<bool>()) {
        let config = if on_key { json!({"columns": "k"}) } else { json!({}) };
        let cfg = TransformConfig::decode("deduplicate", config).unwrap();
        let once = apply(&cfg, &keyed_rows(&keys), None).unwrap();
        let twice = apply(&cfg, &once.data, None).unwrap();
        prop_assert_eq!(&once.data, &twice.data);
        prop_assert_eq!(
            once.metadata.original_count - once.metadata.result_count,
            keys.len() - once.data.len()
        );
    }

    #[test]
    fn ungrouped_aggregate_returns_one_record(keys in key_list()) {
        let cfg = TransformConfig::decode(
            "aggregate",
            json!({"aggregations": {"k": ["sum", "count", "mean", "min", "max", "std", "var", "median"]}}),
        ).unwrap();
        let out = apply(&cfg, &keyed_rows(&keys), None).unwrap();
        prop_assert_eq!(out.data.len(), 1);
        let non_null = i64::try_from(keys.iter().flatten().count()).unwrap();
        prop_assert_eq!(&out.data[0]["k_count"], &Value::Int(non_null));
    }

    #[test]
    fn validate_filter_partitions_input(keys in key_list(), strict in any::<bool>()) {
        let cfg = TransformConfig::decode(
            "validate",
            json!({
                "rules": [
                    {"name": "k_present", "type": "not_null", "config": {"columns": "k"}},
                    {"name": "k_small", "type": "range", "config": {"column": "k", "max": 2}, "severity": "warning"}
                ],
                "action": "filter",
                "strict": strict
            }),
        ).unwrap();
        let out = apply(&cfg, &keyed_rows(&keys), None).unwrap();
        let m = &out.metadata;
        prop_assert_eq!(m.result_count + m.invalid_count(), m.original_count);
        let expected_valid = keys
            .iter()
            .filter(|k| match k {
                None => false,
                Some(v) => !strict || *v <= 2,
            })
            .count();
        prop_assert_eq!(m.result_count, expected_valid);
    }

    #[test]
    fn sort_is_a_stable_permutation(keys in key_list(), desc in any::<bool>()) {
        let direction = if desc { "desc" } else { "asc" };
        let cfg = TransformConfig::decode(
            "sort",
            json!({"columns": [{"column": "k", "direction": direction}]}),
        ).unwrap();
        let out = apply(&cfg, &keyed_rows(&keys), None).unwrap();
        prop_assert_eq!(out.data.len(), keys.len());
        for pair in out.data.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            match (&a["k"], &b["k"]) {
                (Value::Null, other) => prop_assert!(other.is_null()),
                (_, Value::Null) => {}
                (x, y) => {
                    let ord = if desc { y.sort_cmp(x) } else { x.sort_cmp(y) };
                    prop_assert!(ord.is_le());
                    if ord.is_eq() {
                        prop_assert!(a["pos"].sort_cmp(&b["pos"]).is_lt());
                    }
                }
            }
        }
    }

    #[test]
    fn filter_never_grows(keys in key_list(), threshold in 0_i64..5) {
        let cfg = TransformConfig::decode(
            "filter",
            json!({"conditions": [{"column": "k", "operator": "greater_than", "value": threshold}]}),
        ).unwrap();
        let out = apply(&cfg, &keyed_rows(&keys), None).unwrap();
        let expected = keys.iter().flatten().filter(|k| **k > threshold).count();
        prop_assert_eq!(out.data.len(), expected);
    }
}
