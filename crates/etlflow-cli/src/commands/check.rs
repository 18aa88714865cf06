use std::path::Path;

use anyhow::{Context, Result};
use etlflow_engine::config::parser;
use etlflow_engine::orchestrator;

/// Execute the `check` command: validate pipeline config and connector connectivity.
pub async fn execute(pipeline_path: &Path) -> Result<()> {
    // 1. Parse pipeline YAML
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate structure, then check steps and state
    let result = orchestrator::check_pipeline(&config).await?;
    println!("Pipeline structure: OK");

    // 3. Report results
    for step in &result.steps {
        let label = format!("Step {} ({}):", step.order, step.step_type);
        println!("{:18} {}", label, if step.ok { "OK" } else { "FAILED" });
        if !step.message.is_empty() {
            println!("  {} {}", step.label, step.message);
        }
    }

    if result.state_ok {
        println!("State backend:     OK");
    } else {
        println!("State backend:     FAILED");
    }

    if result.all_ok() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}
