mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "etlflow",
    version,
    about = "Run ETL pipelines defined in YAML and inspect their executions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Sample mode: read at most N rows per source and print the result
        #[arg(long, value_name = "N")]
        sample: Option<usize>,
        /// Resume after the latest checkpoint of an earlier execution
        #[arg(long, value_name = "EXECUTION_ID")]
        resume_from: Option<i64>,
    },
    /// Validate pipeline configuration and connectivity
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Show recent executions, or one execution in detail
    Status {
        /// Only executions of this pipeline
        #[arg(long)]
        pipeline: Option<String>,
        /// Show a single execution
        #[arg(long, value_name = "EXECUTION_ID", conflicts_with = "pipeline")]
        execution: Option<i64>,
        /// Maximum executions to list
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// State database (default: ~/.etlflow/state.db)
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Ask a running execution to stop at its next step boundary
    Cancel {
        /// Execution ID
        execution: i64,
        /// State database (default: ~/.etlflow/state.db)
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// List unexpired checkpoints of a pipeline
    Checkpoints {
        /// Pipeline name
        pipeline: String,
        /// Delete expired checkpoints first
        #[arg(long)]
        purge: bool,
        /// State database (default: ~/.etlflow/state.db)
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            pipeline,
            sample,
            resume_from,
        } => commands::run::execute(&pipeline, sample, resume_from).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline).await,
        Commands::Status {
            pipeline,
            execution,
            limit,
            state,
        } => commands::status::execute(state.as_deref(), pipeline.as_deref(), execution, limit),
        Commands::Cancel { execution, state } => {
            commands::cancel::execute(state.as_deref(), execution)
        }
        Commands::Checkpoints {
            pipeline,
            purge,
            state,
        } => commands::checkpoints::execute(state.as_deref(), &pipeline, purge),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "etlflow",
            "run",
            "p.yaml",
            "--sample",
            "10",
            "--resume-from",
            "7",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run {
                pipeline,
                sample,
                resume_from,
            } => {
                assert_eq!(pipeline, PathBuf::from("p.yaml"));
                assert_eq!(sample, Some(10));
                assert_eq!(resume_from, Some(7));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_status_rejects_pipeline_with_execution() {
        assert!(Cli::try_parse_from([
            "etlflow",
            "status",
            "--pipeline",
            "p",
            "--execution",
            "1"
        ])
        .is_err());
    }

    #[test]
    fn test_cancel_requires_execution_id() {
        assert!(Cli::try_parse_from(["etlflow", "cancel"]).is_err());
        assert!(Cli::try_parse_from(["etlflow", "cancel", "3"]).is_ok());
    }
}
