//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for pipeline executions and
//! their checkpoints. Model types live in [`etlflow_types::state`] and
//! [`etlflow_types::checkpoint`].

use etlflow_types::checkpoint::CheckpointRecord;
use etlflow_types::state::{
    Execution, ExecutionFailure, ExecutionId, ExecutionStats, ExecutionStatus, PipelineId,
};

use crate::error;

/// Storage contract for execution state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
/// Every mutation of an execution is checked against
/// [`ExecutionStatus::can_transition_to`]; terminal executions are never
/// modified.
pub trait StateBackend: Send + Sync {
    /// Record a new `pending` execution, returning its ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn create_execution(
        &self,
        pipeline: &PipelineId,
        version: &str,
        resumed_from: Option<ExecutionId>,
    ) -> error::Result<ExecutionId>;

    /// Move a `pending` execution to `running` and stamp `started_at`.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`](crate::error::StateError::InvalidTransition)
    /// unless the execution is `pending`.
    fn mark_running(&self, id: ExecutionId) -> error::Result<()>;

    /// Record the step reached and the counters so far.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`](crate::error::StateError::InvalidTransition)
    /// for terminal executions.
    fn update_progress(
        &self,
        id: ExecutionId,
        current_step: u32,
        stats: &ExecutionStats,
    ) -> error::Result<()>;

    /// Finalize an execution. `failure` is stored for `failed` runs.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`](crate::error::StateError::InvalidTransition)
    /// if `status` is not terminal or the execution already finished.
    fn complete_execution(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        stats: &ExecutionStats,
        failure: Option<&ExecutionFailure>,
    ) -> error::Result<()>;

    /// Flag a live execution for cancellation. Returns `false` when the
    /// execution already finished.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure or
    /// for an unknown execution.
    fn request_cancel(&self, id: ExecutionId) -> error::Result<bool>;

    /// Returns `Ok(None)` for an unknown execution.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_execution(&self, id: ExecutionId) -> error::Result<Option<Execution>>;

    /// Most recent executions first, optionally for one pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_executions(
        &self,
        pipeline: Option<&PipelineId>,
        limit: usize,
    ) -> error::Result<Vec<Execution>>;

    /// Upsert a checkpoint keyed by (execution, step).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn save_checkpoint(&self, checkpoint: &CheckpointRecord) -> error::Result<()>;

    /// Highest-step unexpired checkpoint of an execution.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn latest_checkpoint(&self, execution: ExecutionId) -> error::Result<Option<CheckpointRecord>>;

    /// Unexpired checkpoints of a pipeline, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_checkpoints(&self, pipeline: &PipelineId) -> error::Result<Vec<CheckpointRecord>>;

    /// Delete expired checkpoints. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn purge_expired_checkpoints(&self) -> error::Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn StateBackend`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn StateBackend) {}
    }
}
