//! Pipeline execution engine for etlflow.
//!
//! Parses and validates pipeline YAML, resolves source and destination
//! connectors through a [`ConnectorRegistry`], runs steps in order through
//! the [`Engine`], and records executions and checkpoints in a
//! [`StateBackend`](etlflow_state::StateBackend).

#![warn(clippy::pedantic)]

pub mod checkpoint;
pub mod config;
pub mod connector;
pub mod connectors;
pub mod errors;
pub mod execution;
pub mod orchestrator;
pub mod progress;
pub mod resolve;
pub mod result;

pub use config::{parse_pipeline, parse_pipeline_str, validate_pipeline, PipelineConfig};
pub use connector::{BatchStream, Destination, ExtractRequest, LoadRequest, Source, SourceQuery};
pub use connectors::{ConnectorRegistry, MemoryDestination};
pub use errors::PipelineError;
pub use execution::{CancelHandle, ExecutionOptions};
pub use orchestrator::{check_pipeline, run_pipeline, Engine};
pub use progress::{ChannelProgress, CollectingProgress, NoopProgress, ProgressSink, TracingProgress};
pub use result::{CheckResult, PipelineCounts, PipelineResult, StepCheck, StepResult};
