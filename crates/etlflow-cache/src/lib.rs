//! Two-tier cache for etlflow.
//!
//! A bounded in-process LRU ([`MemoryLayer`]) sits in front of a shared
//! key-value store ([`RemoteLayer`] over a [`KeyValueStore`]). The
//! [`MultiLayerCache`] coordinator handles read-through promotion, hit-ratio
//! accounting and glob invalidation, and never surfaces tier failures.

#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod layer;
pub mod manager;
pub mod memory;
pub mod remote;
pub mod sqlite;
pub mod stats;
pub mod store;

pub use config::CacheConfig;
pub use error::CacheError;
pub use layer::CacheLayer;
pub use manager::MultiLayerCache;
pub use memory::MemoryLayer;
pub use remote::RemoteLayer;
pub use sqlite::SqliteStore;
pub use stats::CacheStats;
pub use store::{InMemoryStore, KeyValueStore};
