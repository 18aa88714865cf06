use std::path::Path;

use anyhow::{Context, Result};
use etlflow_engine::config::{parser, validator};
use etlflow_engine::{orchestrator, CancelHandle, ConnectorRegistry, ExecutionOptions, PipelineResult};
use etlflow_types::state::{ExecutionId, ExecutionStatus};

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(
    pipeline_path: &Path,
    sample: Option<usize>,
    resume_from: Option<i64>,
) -> Result<()> {
    // 1. Parse pipeline YAML
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate
    validator::validate_pipeline(&config, &ConnectorRegistry::builtin())?;

    tracing::info!(
        pipeline = config.pipeline,
        steps = config.steps.len(),
        version = %config.pipeline_version(),
        sample,
        resume_from,
        "Pipeline validated"
    );

    // 3. Ctrl-C stops the run at the next step boundary
    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling at the next step boundary");
            on_interrupt.cancel();
        }
    });

    // 4. Run
    let options = ExecutionOptions {
        sample_size: sample,
        resume_from: resume_from.map(ExecutionId::new),
        cancel,
    };
    let result = orchestrator::run_pipeline(&config, &options).await?;

    print_summary(&result);
    if let Some(preview) = &result.preview {
        println!("\nSample output ({} rows):", preview.len());
        for row in preview {
            println!("{}", serde_json::to_string(row)?);
        }
    }

    if result.status == ExecutionStatus::Cancelled {
        anyhow::bail!("Execution {} was cancelled", result.execution_id);
    }
    Ok(())
}

fn print_summary(result: &PipelineResult) {
    let outcome = if result.is_completed() {
        "completed successfully"
    } else {
        "was cancelled"
    };
    println!("Pipeline '{}' {outcome}.", result.pipeline);
    println!("  Execution:       {}", result.execution_id);
    println!("  Version:         {}", result.version);
    if let Some(step) = result.resumed_after_step {
        println!("  Resumed after:   step {step}");
    }
    println!("  Rows processed:  {}", result.counts.rows_processed);
    println!("  Rows successful: {}", result.counts.rows_successful);
    println!("  Rows failed:     {}", result.counts.rows_failed);
    println!("  Duration:        {:.2}s", result.duration_secs);
    if !result.steps.is_empty() {
        println!("  Steps:");
    }
    for step in &result.steps {
        println!(
            "    [{}] {:<11} {:<12} {:>8} -> {:<8} {:.3}s{}",
            step.order,
            step.step_type.as_str(),
            step.label,
            step.rows_in,
            step.rows_out,
            step.duration_secs,
            if step.cached { " (cached)" } else { "" }
        );
    }
}
