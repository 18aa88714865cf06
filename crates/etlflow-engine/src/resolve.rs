//! State backend and cache construction from pipeline config.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use etlflow_cache::MultiLayerCache;
use etlflow_state::{SqliteStateBackend, StateBackend};

use crate::config::types::PipelineConfig;

/// `~/.etlflow/state.db`, or under `/tmp` when `HOME` is unset.
#[must_use]
pub fn default_state_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".etlflow").join("state.db")
}

/// Open the `SQLite` state store at `path`, or at [`default_state_path`].
///
/// # Errors
///
/// Returns an error if the database can't be opened or initialized.
pub fn open_state_backend(path: Option<&Path>) -> Result<Arc<dyn StateBackend>> {
    let backend = if let Some(path) = path {
        SqliteStateBackend::open(path).context("Failed to open state DB")?
    } else {
        SqliteStateBackend::open(&default_state_path())
            .context("Failed to open default state DB")?
    };
    Ok(Arc::new(backend) as Arc<dyn StateBackend>)
}

/// State backend named by the pipeline's `state` section.
///
/// # Errors
///
/// Returns an error if the database can't be opened or initialized.
pub fn create_state_backend(config: &PipelineConfig) -> Result<Arc<dyn StateBackend>> {
    open_state_backend(config.state.path.as_deref())
}

/// Cache coordinator for the pipeline's `cache` section, if any.
///
/// # Errors
///
/// Returns an error if the shared cache store can't be opened.
pub fn create_cache(config: &PipelineConfig) -> Result<Option<Arc<MultiLayerCache>>> {
    let Some(cache_config) = &config.cache else {
        return Ok(None);
    };
    let cache = MultiLayerCache::from_config(cache_config.clone())
        .context("Failed to open cache store")?;
    Ok(Some(Arc::new(cache)))
}

pub(crate) fn check_state_backend(config: &PipelineConfig) -> bool {
    match create_state_backend(config) {
        Ok(_) => {
            tracing::info!("State backend: OK");
            true
        }
        Err(e) => {
            tracing::error!("State backend: FAILED: {:#}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;
    use etlflow_types::state::PipelineId;
    use tempfile::tempdir;

    fn config_with(extra: &str) -> PipelineConfig {
        let yaml = format!(
            r#"
version: "1.0"
pipeline: test
steps:
  - order: 1
    type: source
    use: inline
    config: {{ rows: [] }}
{extra}
"#
        );
        parse_pipeline_str(&yaml).unwrap()
    }

    #[test]
    fn test_create_state_backend_custom_path() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("state.db");
        let config = config_with(&format!("state: {{ path: '{}' }}", db_path.display()));

        let backend = create_state_backend(&config).unwrap();
        let id = backend
            .create_execution(&PipelineId::new("test"), "v1", None)
            .unwrap();
        assert!(id.get() > 0);
        assert!(db_path.exists());
        assert!(check_state_backend(&config));
    }

    #[test]
    fn test_create_cache_only_when_configured() {
        assert!(create_cache(&config_with("")).unwrap().is_none());
        let cache = create_cache(&config_with("cache: { l1_max_size: 5 }"))
            .unwrap()
            .unwrap();
        assert_eq!(cache.config().l1_max_size, 5);
    }

    #[test]
    fn test_default_state_path_under_home() {
        assert!(default_state_path().ends_with(".etlflow/state.db"));
    }
}
