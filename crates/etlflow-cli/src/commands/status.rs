use std::path::Path;

use anyhow::{Context, Result};
use etlflow_engine::resolve::open_state_backend;
use etlflow_types::state::{Execution, ExecutionId, PipelineId};

/// Execute the `status` command: list recent executions or show one.
pub fn execute(
    state_path: Option<&Path>,
    pipeline: Option<&str>,
    execution: Option<i64>,
    limit: usize,
) -> Result<()> {
    let state = open_state_backend(state_path)?;

    if let Some(id) = execution {
        let exec = state
            .get_execution(ExecutionId::new(id))
            .context("Failed to read execution")?
            .with_context(|| format!("Execution {id} not found"))?;
        print_detail(&exec);
        return Ok(());
    }

    let pipeline = pipeline.map(PipelineId::new);
    let executions = state
        .list_executions(pipeline.as_ref(), limit)
        .context("Failed to list executions")?;
    if executions.is_empty() {
        println!("No executions recorded.");
        return Ok(());
    }
    println!(
        "{:>6}  {:<10} {:<24} {:<21} {:>10} {:>10} {:>8}",
        "ID", "STATUS", "PIPELINE", "STARTED", "PROCESSED", "LOADED", "FAILED"
    );
    for exec in &executions {
        println!("{}", summary_line(exec));
    }
    Ok(())
}

fn summary_line(exec: &Execution) -> String {
    format!(
        "{:>6}  {:<10} {:<24} {:<21} {:>10} {:>10} {:>8}",
        exec.id.get(),
        exec.status.as_str(),
        exec.pipeline.as_str(),
        exec.started_at.as_deref().unwrap_or("-"),
        exec.stats.rows_processed,
        exec.stats.rows_successful,
        exec.stats.rows_failed
    )
}

fn print_detail(exec: &Execution) {
    println!("Execution {}", exec.id);
    println!("  Pipeline:        {}", exec.pipeline);
    println!("  Version:         {}", exec.version);
    println!("  Status:          {}", exec.status);
    println!("  Created:         {}", exec.created_at);
    println!("  Started:         {}", exec.started_at.as_deref().unwrap_or("-"));
    println!("  Finished:        {}", exec.finished_at.as_deref().unwrap_or("-"));
    if let Some(step) = exec.current_step {
        println!("  Current step:    {step}");
    }
    println!("  Rows processed:  {}", exec.stats.rows_processed);
    println!("  Rows successful: {}", exec.stats.rows_successful);
    println!("  Rows failed:     {}", exec.stats.rows_failed);
    if let Some(from) = exec.resumed_from {
        println!("  Resumed from:    {from}");
    }
    if exec.cancel_requested {
        println!("  Cancel requested");
    }
    if let Some(message) = &exec.error_message {
        match exec.error_step {
            Some(step) => println!("  Error (step {step}): {message}"),
            None => println!("  Error: {message}"),
        }
    }
    if let Some(log) = &exec.execution_log {
        println!("\n{log}");
    }
}
