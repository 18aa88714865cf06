//! Checkpoint capture and restore.
//!
//! A checkpoint holds everything the executor needs to continue after a
//! step: the current dataset, every named source dataset, and the counters.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use etlflow_types::checkpoint::{CheckpointPolicy, CheckpointRecord};
use etlflow_types::state::{ExecutionId, ExecutionStats, PipelineId};
use etlflow_types::Dataset;
use serde::{Deserialize, Serialize};

use crate::config::types::CheckpointConfig;

/// Intermediate state stored in `checkpoint_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub current: Dataset,
    #[serde(default)]
    pub datasets: BTreeMap<String, Dataset>,
    #[serde(default)]
    pub stats: ExecutionStats,
}

impl CheckpointState {
    /// # Errors
    ///
    /// Returns an error if the datasets can't be serialized.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize checkpoint state")
    }

    /// # Errors
    ///
    /// Returns an error if `raw` isn't a checkpoint written by [`encode`](Self::encode).
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to decode checkpoint state")
    }
}

/// Decides at which step boundaries a checkpoint is written.
#[derive(Debug, Clone)]
pub(crate) struct CheckpointTracker {
    enabled: bool,
    policy: CheckpointPolicy,
    retention: Duration,
    rows_at_last: u64,
}

impl CheckpointTracker {
    pub(crate) fn new(config: &CheckpointConfig, rows_at_start: u64) -> Self {
        let hours = i64::try_from(config.retention_hours).unwrap_or(i64::MAX / 3600);
        Self {
            enabled: config.enabled,
            policy: config.policy,
            retention: Duration::hours(hours.min(24 * 365 * 100)),
            rows_at_last: rows_at_start,
        }
    }

    /// Whether a checkpoint is due now that `rows_processed` rows were seen.
    pub(crate) fn is_due(&self, rows_processed: u64) -> bool {
        if !self.enabled {
            return false;
        }
        match self.policy {
            CheckpointPolicy::EveryStep => true,
            CheckpointPolicy::EveryRows(n) => rows_processed.saturating_sub(self.rows_at_last) >= n,
        }
    }

    pub(crate) fn mark_saved(&mut self, rows_processed: u64) {
        self.rows_at_last = rows_processed;
    }

    /// Build the record for a checkpoint taken after step `step_index`.
    pub(crate) fn record(
        &self,
        pipeline: &PipelineId,
        execution_id: ExecutionId,
        version: &str,
        step_index: u32,
        state: &CheckpointState,
    ) -> Result<CheckpointRecord> {
        let now = Utc::now();
        Ok(CheckpointRecord {
            pipeline: pipeline.clone(),
            execution_id,
            version: version.to_string(),
            step_index,
            checkpoint_data: state.encode()?,
            rows_processed: state.stats.rows_processed,
            created_at: now.to_rfc3339(),
            expires_at: (now + self.retention).to_rfc3339(),
        })
    }
}
