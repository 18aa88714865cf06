use std::path::Path;

use anyhow::{Context, Result};
use etlflow_engine::resolve::open_state_backend;
use etlflow_types::state::PipelineId;

/// Execute the `checkpoints` command: list a pipeline's unexpired checkpoints.
pub fn execute(state_path: Option<&Path>, pipeline: &str, purge: bool) -> Result<()> {
    let state = open_state_backend(state_path)?;

    if purge {
        let removed = state
            .purge_expired_checkpoints()
            .context("Failed to purge expired checkpoints")?;
        println!("Purged {removed} expired checkpoint(s).");
    }

    let checkpoints = state
        .list_checkpoints(&PipelineId::new(pipeline))
        .context("Failed to list checkpoints")?;
    if checkpoints.is_empty() {
        println!("No checkpoints for pipeline '{pipeline}'.");
        return Ok(());
    }
    println!(
        "{:>9} {:>5} {:>10}  {:<21} {:<21} VERSION",
        "EXECUTION", "STEP", "ROWS", "CREATED", "EXPIRES"
    );
    for cp in &checkpoints {
        println!(
            "{:>9} {:>5} {:>10}  {:<21} {:<21} {}",
            cp.execution_id.get(), cp.step_index, cp.rows_processed, cp.created_at, cp.expires_at, cp.version
        );
    }
    println!("\nResume with: etlflow run <pipeline.yaml> --resume-from <EXECUTION>");
    Ok(())
}
