//! Connector registry and built-in connectors.
//!
//! A pipeline step names its connector with `use:`; the registry maps that
//! name to a factory building a fresh connector from the step's config.

pub mod inline;
pub mod jsonl;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use etlflow_types::error::ConnectorError;
use etlflow_types::Record;

use crate::connector::{Destination, Source};

pub use inline::InlineSource;
pub use jsonl::{JsonlDestination, JsonlSource};
pub use memory::MemoryDestination;

/// Builds a source from a step's `config`.
pub type SourceFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Box<dyn Source>, ConnectorError> + Send + Sync>;

/// Builds a destination from a step's `config`.
pub type DestinationFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Box<dyn Destination>, ConnectorError> + Send + Sync>;

/// Name → factory lookup for sources and destinations.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    sources: BTreeMap<String, SourceFactory>,
    destinations: BTreeMap<String, DestinationFactory>,
}

impl ConnectorRegistry {
    /// Registry with no connectors.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in `inline` and `jsonl` connectors.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_source("inline", |config| {
            Ok(Box::new(InlineSource::from_config(config)?) as Box<dyn Source>)
        });
        registry.register_source("jsonl", |config| {
            Ok(Box::new(JsonlSource::from_config(config)?) as Box<dyn Source>)
        });
        registry.register_destination("jsonl", |config| {
            Ok(Box::new(JsonlDestination::from_config(config)?) as Box<dyn Destination>)
        });
        registry
    }

    pub fn register_source<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Source>, ConnectorError> + Send + Sync + 'static,
    {
        self.sources.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn register_destination<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Destination>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.destinations.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register a shared in-process buffer as destination `name`. Every
    /// load through the registry writes into the same buffer.
    pub fn register_memory(&mut self, name: impl Into<String>, sink: &MemoryDestination) -> &mut Self {
        let sink = sink.clone();
        self.register_destination(name, move |_| Ok(Box::new(sink.clone()) as Box<dyn Destination>))
    }

    #[must_use]
    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    #[must_use]
    pub fn has_destination(&self, name: &str) -> bool {
        self.destinations.contains_key(name)
    }

    /// Registered source names, sorted.
    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// Registered destination names, sorted.
    #[must_use]
    pub fn destination_names(&self) -> Vec<&str> {
        self.destinations.keys().map(String::as_str).collect()
    }

    /// Build source `name` from `config`.
    ///
    /// # Errors
    ///
    /// Config error for an unknown name, otherwise whatever the factory
    /// reports.
    pub fn source(&self, name: &str, config: &serde_json::Value) -> Result<Box<dyn Source>, ConnectorError> {
        let factory = self.sources.get(name).ok_or_else(|| {
            ConnectorError::config(
                "UNKNOWN_CONNECTOR",
                format!("unknown source connector '{name}'"),
            )
        })?;
        factory(config)
    }

    /// Build destination `name` from `config`.
    ///
    /// # Errors
    ///
    /// Config error for an unknown name, otherwise whatever the factory
    /// reports.
    pub fn destination(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn Destination>, ConnectorError> {
        let factory = self.destinations.get(name).ok_or_else(|| {
            ConnectorError::config(
                "UNKNOWN_CONNECTOR",
                format!("unknown destination connector '{name}'"),
            )
        })?;
        factory(config)
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("sources", &self.source_names())
            .field("destinations", &self.destination_names())
            .finish()
    }
}

/// Decode a connector config, mapping failures to a config error.
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(
    connector: &str,
    config: &serde_json::Value,
) -> Result<T, ConnectorError> {
    serde_json::from_value(config.clone())
        .map_err(|e| ConnectorError::config("INVALID_CONFIG", format!("{connector}: {e}")))
}

/// Merge `incoming` into `existing` by `primary_key`: matching rows are
/// replaced in place, new keys are appended. Returns rows written.
pub(crate) fn upsert_rows(
    existing: &mut Vec<Record>,
    incoming: &[Record],
    primary_key: &[String],
) -> Result<u64, ConnectorError> {
    if primary_key.is_empty() {
        return Err(ConnectorError::config(
            "MISSING_PRIMARY_KEY",
            "upsert requires at least one primary_key column",
        ));
    }
    let key_of = |row: &Record, index: usize| -> Result<String, ConnectorError> {
        primary_key
            .iter()
            .map(|column| match row.get(column) {
                Some(value) if !value.is_null() => Ok(value.key(true)),
                _ => Err(ConnectorError::data(
                    "NULL_PRIMARY_KEY",
                    format!("record {index} has no value for primary key '{column}'"),
                )),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|parts| parts.join("\u{1f}"))
    };

    let mut positions = std::collections::HashMap::new();
    for (index, row) in existing.iter().enumerate() {
        // Rows written before the key existed can't be matched.
        if let Ok(key) = key_of(row, index) {
            positions.insert(key, index);
        }
    }
    for (index, row) in incoming.iter().enumerate() {
        let key = key_of(row, index)?;
        match positions.get(&key) {
            Some(&at) => existing[at] = row.clone(),
            None => {
                positions.insert(key, existing.len());
                existing.push(row.clone());
            }
        }
    }
    Ok(incoming.len() as u64)
}
