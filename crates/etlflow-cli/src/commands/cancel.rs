use std::path::Path;

use anyhow::{Context, Result};
use etlflow_engine::resolve::open_state_backend;
use etlflow_types::state::ExecutionId;

/// Execute the `cancel` command: flag an execution for cancellation. The
/// running process stops before its next step.
pub fn execute(state_path: Option<&Path>, execution: i64) -> Result<()> {
    let state = open_state_backend(state_path)?;
    let id = ExecutionId::new(execution);

    let requested = state
        .request_cancel(id)
        .with_context(|| format!("Failed to cancel execution {id}"))?;
    if requested {
        tracing::info!(execution_id = execution, "Cancellation requested");
        println!("Cancellation requested for execution {id}.");
    } else {
        let status = state
            .get_execution(id)
            .context("Failed to read execution")?
            .map_or_else(|| "unknown".to_string(), |e| e.status.to_string());
        println!("Execution {id} already finished ({status}).");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use etlflow_state::{SqliteStateBackend, StateBackend};
    use etlflow_types::state::{ExecutionStatus, PipelineId};

    #[test]
    fn test_cancel_flags_running_execution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let id = {
            let state = SqliteStateBackend::open(&path).unwrap();
            let id = state
                .create_execution(&PipelineId::new("p"), "v1", None)
                .unwrap();
            state.mark_running(id).unwrap();
            id
        };

        execute(Some(&path), id.get()).unwrap();

        let state = SqliteStateBackend::open(&path).unwrap();
        let exec = state.get_execution(id).unwrap().unwrap();
        assert!(exec.cancel_requested);
        assert_eq!(exec.status, ExecutionStatus::Running);
    }

    #[test]
    fn test_cancel_unknown_execution_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        assert!(execute(Some(&path), 999).is_err());
    }
}
