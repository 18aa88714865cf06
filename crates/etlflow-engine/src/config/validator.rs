//! Semantic validation for parsed pipeline configuration values.

use std::collections::HashSet;

use anyhow::{bail, Result};
use etlflow_transform::TransformConfig;
use etlflow_types::checkpoint::CheckpointPolicy;
use etlflow_types::wire::LoadMode;

use crate::config::types::{PipelineConfig, StepConfig};
use crate::connectors::ConnectorRegistry;

/// Validate a parsed pipeline configuration against the connectors in
/// `registry`. Returns `Ok(())` if valid, Err with all validation errors if
/// not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig, registry: &ConnectorRegistry) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.steps.is_empty() {
        errors.push("Pipeline must define at least one step".to_string());
    }

    if config.batch_size == 0 {
        errors.push("batch_size must be at least 1".to_string());
    }

    if config.checkpoint.policy == CheckpointPolicy::EveryRows(0) {
        errors.push("checkpoint every_rows must be at least 1".to_string());
    }
    if config.checkpoint.retention_hours == 0 {
        errors.push("checkpoint retention_hours must be at least 1".to_string());
    }

    let mut seen_orders = HashSet::new();
    for step in &config.steps {
        if !seen_orders.insert(step.order()) {
            errors.push(format!("Duplicate step order {}", step.order()));
        }
    }

    let mut datasets: HashSet<String> = HashSet::new();
    for step in config.ordered_steps() {
        let order = step.order();
        match step {
            StepConfig::Source(s) => {
                if s.use_ref.trim().is_empty() {
                    errors.push(format!("Step {order}: source connector (use) must not be empty"));
                } else if !registry.has_source(&s.use_ref) {
                    errors.push(format!("Step {order}: unknown source connector '{}'", s.use_ref));
                }
                if s.cache_ttl_seconds == Some(0) {
                    errors.push(format!("Step {order}: cache_ttl_seconds must be at least 1"));
                }
                if !datasets.insert(s.dataset_name()) {
                    errors.push(format!(
                        "Step {order}: dataset name '{}' is already used",
                        s.dataset_name()
                    ));
                }
            }
            StepConfig::Transform(t) => {
                if datasets.is_empty() {
                    errors.push(format!(
                        "Step {order}: transform '{}' has no source step before it",
                        t.transform
                    ));
                }
                match TransformConfig::decode(&t.transform, t.config.clone()) {
                    Ok(TransformConfig::Join(join)) => match &join.right {
                        None => errors.push(format!(
                            "Step {order}: join requires 'right' naming an earlier source dataset"
                        )),
                        Some(name) if !datasets.contains(name) => errors.push(format!(
                            "Step {order}: join references unknown dataset '{name}'"
                        )),
                        Some(_) => {}
                    },
                    Ok(_) => {}
                    Err(e) => errors.push(format!("Step {order}: {e}")),
                }
            }
            StepConfig::Destination(d) => {
                if datasets.is_empty() {
                    errors.push(format!(
                        "Step {order}: destination has no source step before it"
                    ));
                }
                if d.use_ref.trim().is_empty() {
                    errors.push(format!(
                        "Step {order}: destination connector (use) must not be empty"
                    ));
                } else if !registry.has_destination(&d.use_ref) {
                    errors.push(format!(
                        "Step {order}: unknown destination connector '{}'",
                        d.use_ref
                    ));
                }
                if d.mode == LoadMode::Upsert && d.primary_key.is_empty() {
                    errors.push(format!(
                        "Step {order}: mode 'upsert' requires at least one primary_key field"
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}
