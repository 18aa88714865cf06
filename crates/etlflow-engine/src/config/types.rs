//! Pipeline YAML model.

use std::path::PathBuf;

use etlflow_cache::CacheConfig;
use etlflow_types::checkpoint::CheckpointPolicy;
use etlflow_types::wire::{LoadMode, StepType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::connector::SourceQuery;

/// Top-level pipeline file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Config format version; only `"1.0"` is accepted.
    pub version: String,
    pub pipeline: String,
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
}

fn default_batch_size() -> usize {
    1000
}

impl PipelineConfig {
    /// Steps sorted by `order`.
    #[must_use]
    pub fn ordered_steps(&self) -> Vec<&StepConfig> {
        let mut steps: Vec<&StepConfig> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order());
        steps
    }

    /// Version recorded on executions and checkpoints: a digest of the step
    /// definitions. Resuming is only allowed between executions of the same
    /// version.
    #[must_use]
    pub fn pipeline_version(&self) -> String {
        let mut hasher = Sha256::new();
        for step in self.ordered_steps() {
            // serde_json maps are ordered, so the encoding is stable.
            if let Ok(bytes) = serde_json::to_vec(step) {
                hasher.update(&bytes);
            }
            hasher.update(b"\n");
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

/// One pipeline step, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    Source(SourceStep),
    Transform(TransformStep),
    Destination(DestinationStep),
}

impl StepConfig {
    #[must_use]
    pub fn order(&self) -> u32 {
        match self {
            Self::Source(s) => s.order,
            Self::Transform(s) => s.order,
            Self::Destination(s) => s.order,
        }
    }

    #[must_use]
    pub fn step_type(&self) -> StepType {
        match self {
            Self::Source(_) => StepType::Source,
            Self::Transform(_) => StepType::Transform,
            Self::Destination(_) => StepType::Destination,
        }
    }

    /// Short label for logs: the connector or operator name.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Source(s) => &s.use_ref,
            Self::Transform(s) => &s.transform,
            Self::Destination(s) => &s.use_ref,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStep {
    pub order: u32,
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub query: SourceQuery,
    /// Handle later steps (JOIN) use to reference this dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Cache extracted rows for this long when the pipeline has a cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_seconds: Option<u64>,
}

impl SourceStep {
    /// `name`, or `source_<order>`.
    #[must_use]
    pub fn dataset_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("source_{}", self.order))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformStep {
    pub order: u32,
    pub transform: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationStep {
    pub order: u32,
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub mode: LoadMode,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_policy")]
    pub policy: CheckpointPolicy,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

fn default_true() -> bool {
    true
}

fn default_policy() -> CheckpointPolicy {
    CheckpointPolicy::EveryStep
}

fn default_retention_hours() -> u64 {
    24
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            policy: default_policy(),
            retention_hours: default_retention_hours(),
        }
    }
}

/// Where execution state is stored. Defaults to `~/.etlflow/state.db`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}
