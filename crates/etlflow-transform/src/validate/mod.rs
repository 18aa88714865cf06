//! VALIDATE: evaluate data-quality rules per record.
//!
//! Rules are compiled once per call ([`RuleSpec::compile`]), given the chance
//! to scan the whole dataset ([`CompiledRule::prepare`], used by `unique`),
//! then checked record by record. Failures are collected per rule; whether a
//! failing record counts as invalid depends on the rule's [`Severity`] and
//! the config's `strict` flag.

mod rules;

use etlflow_types::value::normalize_schema;
use etlflow_types::{Record, Value};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransformError};
use crate::output::{OperatorDetails, TransformOutput};

pub use rules::{
    CompiledCheck, CompiledRule, DatasetContext, ExpectedType, RuleSpec, RuleType, Severity,
    ViolationReason,
};

/// Column added by the `flag` action holding `valid` or `invalid`.
pub const STATUS_COLUMN: &str = "_validation_status";
/// Column added by the `flag` action listing violated rule names.
pub const ERRORS_COLUMN: &str = "_validation_errors";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationAction {
    /// Return every record unchanged plus the violation list.
    #[default]
    Report,
    /// Drop invalid records.
    Filter,
    /// Keep every record and annotate it.
    Flag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateConfig {
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub action: ValidationAction,
    /// Treat warning-severity failures as invalidating too.
    #[serde(default)]
    pub strict: bool,
}

impl ValidateConfig {
    /// Compile every rule.
    ///
    /// # Errors
    ///
    /// Config error when there are no rules or any rule fails to compile.
    pub fn compile(&self) -> Result<Vec<CompiledRule>> {
        if self.rules.is_empty() {
            return Err(TransformError::config("rules must not be empty"));
        }
        self.rules.iter().map(RuleSpec::compile).collect()
    }
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub record_index: usize,
    pub column: String,
    pub reason: String,
}

/// Pass/fail tally for one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub name: String,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub passed: usize,
    pub failed: usize,
}

/// VALIDATE metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub action: ValidationAction,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub rules: Vec<RuleOutcome>,
    /// Present for `report` and `flag`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<Violation>>,
}

/// Run the configured rules over `dataset`.
///
/// # Errors
///
/// Config errors from rule compilation. Rule failures are never errors.
pub fn validate(dataset: &[Record], config: &ValidateConfig) -> Result<TransformOutput> {
    let rules = config.compile()?;
    let contexts: Vec<DatasetContext> = rules.iter().map(|r| r.prepare(dataset)).collect();

    let mut outcomes: Vec<RuleOutcome> = rules
        .iter()
        .map(|r| RuleOutcome {
            name: r.name.clone(),
            rule_type: r.rule_type,
            severity: r.severity,
            passed: 0,
            failed: 0,
        })
        .collect();
    let mut violations = Vec::new();
    let mut invalid = vec![false; dataset.len()];
    let mut failed_rules: Vec<Vec<String>> = vec![Vec::new(); dataset.len()];

    for (row, record) in dataset.iter().enumerate() {
        for ((rule, ctx), outcome) in rules.iter().zip(&contexts).zip(outcomes.iter_mut()) {
            match rule.check(record, ctx) {
                Ok(()) => outcome.passed += 1,
                Err(reason) => {
                    outcome.failed += 1;
                    if rule.severity == Severity::Error || config.strict {
                        invalid[row] = true;
                    }
                    failed_rules[row].push(rule.name.clone());
                    violations.push(Violation {
                        rule: rule.name.clone(),
                        rule_type: rule.rule_type,
                        severity: rule.severity,
                        record_index: row,
                        column: rule.column_label(),
                        reason: reason.to_string(),
                    });
                }
            }
        }
    }

    let invalid_count = invalid.iter().filter(|i| **i).count();
    let valid_count = dataset.len() - invalid_count;

    let data: Vec<Record> = match config.action {
        ValidationAction::Report => dataset.to_vec(),
        ValidationAction::Filter => dataset
            .iter()
            .zip(&invalid)
            .filter(|(_, bad)| !**bad)
            .map(|(r, _)| r.clone())
            .collect(),
        ValidationAction::Flag => {
            let mut flagged: Vec<Record> = dataset
                .iter()
                .zip(invalid.iter().zip(failed_rules))
                .map(|(r, (bad, names))| {
                    let mut r = r.clone();
                    let status = if *bad { "invalid" } else { "valid" };
                    r.insert(STATUS_COLUMN.to_string(), Value::from(status));
                    r.insert(
                        ERRORS_COLUMN.to_string(),
                        Value::List(names.into_iter().map(Value::Text).collect()),
                    );
                    r
                })
                .collect();
            normalize_schema(&mut flagged);
            flagged
        }
    };

    if invalid_count > 0 {
        tracing::info!(
            invalid_count,
            valid_count,
            violations = violations.len(),
            "validation found invalid records"
        );
    }

    let violations = match config.action {
        ValidationAction::Report | ValidationAction::Flag => Some(violations),
        ValidationAction::Filter => None,
    };

    Ok(TransformOutput::new(
        dataset.len(),
        data,
        OperatorDetails::Validate(ValidationDetails {
            action: config.action,
            valid_count,
            invalid_count,
            rules: outcomes,
            violations,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etlflow_types::value::record;
    use serde_json::json;

    fn config(action: ValidationAction, rules: serde_json::Value) -> ValidateConfig {
        serde_json::from_value(json!({"rules": rules, "action": action})).unwrap()
    }

    fn details(out: &TransformOutput) -> &ValidationDetails {
        match &out.metadata.details {
            OperatorDetails::Validate(d) => d,
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn report_not_null_references_failing_record() {
        let data = vec![record([("name", Value::from("A"))]), record([("name", Value::Null)])];
        let cfg = config(
            ValidationAction::Report,
            json!([{"name": "name_required", "type": "not_null", "config": {"columns": "name"}}]),
        );
        let out = validate(&data, &cfg).unwrap();
        assert_eq!(out.metadata.result_count, 2);
        let d = details(&out);
        assert_eq!(d.invalid_count, 1);
        let violations = d.violations.as_ref().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].record_index, 1);
        assert_eq!(violations[0].rule, "name_required");
        assert_eq!(violations[0].column, "name");
    }

    #[test]
    fn warnings_only_invalidate_in_strict_mode() {
        let data = vec![record([("age", 200)]), record([("age", 20)])];
        let rules = json!([{
            "name": "plausible_age",
            "type": "range",
            "config": {"column": "age", "min": 0, "max": 120},
            "severity": "warning"
        }]);
        let lenient = config(ValidationAction::Filter, rules.clone());
        let out = validate(&data, &lenient).unwrap();
        assert_eq!(out.data.len(), 2);
        assert_eq!(details(&out).rules[0].failed, 1);

        let mut strict = config(ValidationAction::Filter, rules);
        strict.strict = true;
        let out = validate(&data, &strict).unwrap();
        assert_eq!(out.data.len(), 1);
        assert_eq!(details(&out).invalid_count, 1);
    }

    #[test]
    fn flag_annotates_every_record() {
        let data = vec![record([("email", "a@b.io")]), record([("email", "nope")])];
        let cfg = config(
            ValidationAction::Flag,
            json!([{"name": "email_format", "type": "data_type", "config": {"column": "email", "expected": "email"}}]),
        );
        let out = validate(&data, &cfg).unwrap();
        assert_eq!(out.data[0][STATUS_COLUMN], Value::from("valid"));
        assert_eq!(out.data[0][ERRORS_COLUMN], Value::List(vec![]));
        assert_eq!(out.data[1][STATUS_COLUMN], Value::from("invalid"));
        assert_eq!(
            out.data[1][ERRORS_COLUMN],
            Value::List(vec![Value::from("email_format")])
        );
    }

    #[test]
    fn filter_omits_violation_list() {
        let data = vec![record([("id", 1)]), record([("id", 1)]), record([("id", 2)])];
        let cfg = config(
            ValidationAction::Filter,
            json!([{"name": "id_unique", "type": "unique", "config": {"columns": ["id"]}}]),
        );
        let out = validate(&data, &cfg).unwrap();
        assert_eq!(out.data.len(), 1);
        let d = details(&out);
        assert!(d.violations.is_none());
        assert_eq!(out.metadata.result_count + d.invalid_count, out.metadata.original_count);
    }

    #[test]
    fn empty_rules_is_config_error() {
        let cfg = config(ValidationAction::Report, json!([]));
        assert!(validate(&[], &cfg).unwrap_err().is_config());
    }
}
