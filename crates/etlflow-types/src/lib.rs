//! Shared etlflow data model.
//!
//! Values and datasets that flow between pipeline steps, the connector error
//! model, and the execution/checkpoint/progress types shared by the state
//! backend, the engine, and the CLI.

#![warn(clippy::pedantic)]

pub mod catalog;
pub mod checkpoint;
pub mod error;
pub mod progress;
pub mod state;
pub mod summary;
pub mod value;
pub mod wire;

pub use value::{Dataset, Record, Value};
