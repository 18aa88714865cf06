//! Pipeline configuration: YAML model, parsing, and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_pipeline, parse_pipeline_str};
pub use types::{
    CheckpointConfig, DestinationStep, PipelineConfig, SourceStep, StateConfig, StepConfig,
    TransformStep,
};
pub use validator::validate_pipeline;
