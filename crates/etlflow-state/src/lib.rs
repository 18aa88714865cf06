//! Execution state persistence for etlflow.
//!
//! Records the execution lifecycle and step checkpoints through the
//! [`StateBackend`] trait. [`SqliteStateBackend`] is the bundled
//! implementation.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;
