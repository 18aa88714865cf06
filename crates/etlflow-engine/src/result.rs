//! Pipeline execution result types.

use etlflow_types::state::{ExecutionId, ExecutionStatus};
use etlflow_types::wire::StepType;
use etlflow_types::Dataset;

/// Aggregate row counts for an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCounts {
    /// Rows extracted by source steps (cache hits included).
    pub rows_processed: u64,
    /// Rows accepted by destinations.
    pub rows_successful: u64,
    /// Records judged invalid by VALIDATE steps.
    pub rows_failed: u64,
}

/// What one step did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub order: u32,
    pub step_type: StepType,
    /// Connector or operator name.
    pub label: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub duration_secs: f64,
    /// Source rows came from the cache rather than the connector.
    pub cached: bool,
}

/// Result of a finished (completed or cancelled) execution.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub execution_id: ExecutionId,
    pub pipeline: String,
    pub version: String,
    pub status: ExecutionStatus,
    pub counts: PipelineCounts,
    pub steps: Vec<StepResult>,
    /// Final dataset, kept only in sample mode.
    pub preview: Option<Dataset>,
    pub duration_secs: f64,
    /// Step order the run resumed after, when restored from a checkpoint.
    pub resumed_after_step: Option<u32>,
}

impl PipelineResult {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// Outcome of checking one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCheck {
    pub order: u32,
    pub step_type: StepType,
    pub label: String,
    pub ok: bool,
    pub message: String,
}

/// Result of a pipeline check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub steps: Vec<StepCheck>,
    pub state_ok: bool,
}

impl CheckResult {
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.state_ok && self.steps.iter().all(|s| s.ok)
    }
}
