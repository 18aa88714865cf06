//! Pipeline YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::PipelineConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        missing.dedup();
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a pipeline YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: PipelineConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse pipeline YAML")?;
    Ok(config)
}

/// Parse a pipeline YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::StepConfig;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("ETLFLOW_TEST_DIR", "/srv/data");
        let input = "path: ${ETLFLOW_TEST_DIR}/in.jsonl";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "path: /srv/data/in.jsonl");
        std::env::remove_var("ETLFLOW_TEST_DIR");
    }

    #[test]
    fn test_multiple_env_vars() {
        std::env::set_var("ETLFLOW_TEST_A", "alpha");
        std::env::set_var("ETLFLOW_TEST_B", "beta");
        let result = substitute_env_vars("${ETLFLOW_TEST_A} and ${ETLFLOW_TEST_B}").unwrap();
        assert_eq!(result, "alpha and beta");
        std::env::remove_var("ETLFLOW_TEST_A");
        std::env::remove_var("ETLFLOW_TEST_B");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "pipeline: test\nbatch_size: 10";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let err = substitute_env_vars("${ETLFLOW_MISSING_X} and ${ETLFLOW_MISSING_Y}")
            .unwrap_err()
            .to_string();
        assert!(err.contains("ETLFLOW_MISSING_X"));
        assert!(err.contains("ETLFLOW_MISSING_Y"));
    }

    #[test]
    fn test_parse_pipeline_from_string() {
        std::env::set_var("ETLFLOW_TEST_OUT", "/tmp/etlflow-out.jsonl");
        let yaml = r#"
version: "1.0"
pipeline: test
steps:
  - order: 1
    type: source
    use: inline
    config:
      rows: [{id: 1}]
  - order: 2
    type: destination
    use: jsonl
    config:
      path: ${ETLFLOW_TEST_OUT}
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let StepConfig::Destination(dest) = &config.steps[1] else {
            panic!("expected destination step");
        };
        assert_eq!(dest.config["path"], "/tmp/etlflow-out.jsonl");
        std::env::remove_var("ETLFLOW_TEST_OUT");
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        assert!(parse_pipeline_str("this is not: [valid: yaml: {{{}}}").is_err());
    }

    #[test]
    fn test_parse_unknown_step_type_errors() {
        let yaml = r#"
version: "1.0"
pipeline: test
steps:
  - order: 1
    type: report
"#;
        assert!(parse_pipeline_str(yaml).is_err());
    }

    #[test]
    fn test_parse_pipeline_file_not_found() {
        let err = parse_pipeline(Path::new("/nonexistent/pipeline.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to read pipeline file"));
    }
}
