//! Typed operator configs and boundary decoding.
//!
//! Pipeline files carry each transform as a `(kind, config)` pair of loose
//! JSON/YAML. [`TransformConfig::decode`] turns that pair into one of the
//! typed per-operator configs, rejecting unknown fields, so operators never
//! see untyped configuration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateConfig;
use crate::calculate::CalculateConfig;
use crate::dedup::DeduplicateConfig;
use crate::error::{Result, TransformError};
use crate::filter::FilterConfig;
use crate::join::JoinConfig;
use crate::map::MapConfig;
use crate::sort::SortConfig;
use crate::validate::ValidateConfig;

/// A single column name or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSelector {
    One(String),
    Many(Vec<String>),
}

impl ColumnSelector {
    /// The selected names, each checked to be non-blank.
    ///
    /// # Errors
    ///
    /// Returns a config error naming `what` when the selector is empty or
    /// holds a blank name.
    pub fn names(&self, what: &str) -> Result<Vec<String>> {
        let names = match self {
            Self::One(name) => vec![name.clone()],
            Self::Many(names) => names.clone(),
        };
        if names.is_empty() {
            return Err(TransformError::config(format!("{what} must not be empty")));
        }
        for name in &names {
            ensure_non_empty_column(name, what)?;
        }
        Ok(names)
    }
}

pub(crate) fn ensure_non_empty_column(name: &str, what: &str) -> Result<()> {
    if name.trim().is_empty() {
        Err(TransformError::config(format!(
            "{what} contains an empty column name"
        )))
    } else {
        Ok(())
    }
}

/// Operator kind plus its typed config.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformConfig {
    Join(JoinConfig),
    Deduplicate(DeduplicateConfig),
    Validate(ValidateConfig),
    Aggregate(AggregateConfig),
    Filter(FilterConfig),
    Sort(SortConfig),
    Map(MapConfig),
    Calculate(CalculateConfig),
}

/// Operator kinds accepted by [`TransformConfig::decode`].
pub const KINDS: &[&str] = &[
    "join",
    "deduplicate",
    "validate",
    "aggregate",
    "filter",
    "sort",
    "map",
    "calculate",
];

impl TransformConfig {
    /// Decode a `(kind, config)` pair. Kind matching is case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Config`] for an unknown kind, a config that
    /// does not match the kind's shape, or a config that fails the kind's
    /// own checks (for example an invalid regex).
    pub fn decode(kind: &str, config: serde_json::Value) -> Result<Self> {
        let config = if config.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            config
        };
        let decoded = match kind.to_ascii_lowercase().as_str() {
            "join" => Self::Join(parse(kind, config)?),
            "deduplicate" | "dedup" => Self::Deduplicate(parse(kind, config)?),
            "validate" => Self::Validate(parse(kind, config)?),
            "aggregate" => Self::Aggregate(parse(kind, config)?),
            "filter" => Self::Filter(parse(kind, config)?),
            "sort" => Self::Sort(parse(kind, config)?),
            "map" => Self::Map(parse(kind, config)?),
            "calculate" => Self::Calculate(parse(kind, config)?),
            other => {
                return Err(TransformError::config(format!(
                    "unknown transform '{other}' (expected one of: {})",
                    KINDS.join(", ")
                )))
            }
        };
        decoded.check()?;
        Ok(decoded)
    }

    /// Lower-case operator name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Deduplicate(_) => "deduplicate",
            Self::Validate(_) => "validate",
            Self::Aggregate(_) => "aggregate",
            Self::Filter(_) => "filter",
            Self::Sort(_) => "sort",
            Self::Map(_) => "map",
            Self::Calculate(_) => "calculate",
        }
    }

    /// Data-independent checks, so configuration mistakes surface before a
    /// pipeline starts.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found.
    pub fn check(&self) -> Result<()> {
        match self {
            Self::Join(c) => c.key_pairs().map(|_| ()),
            Self::Deduplicate(c) => c.check(),
            Self::Validate(c) => c.compile().map(|_| ()),
            Self::Aggregate(c) => c.check(),
            Self::Filter(c) => c.check(),
            Self::Sort(c) => c.check(),
            Self::Map(c) => c.check(),
            Self::Calculate(c) => c.compile().map(|_| ()),
        }
    }
}

fn parse<T: DeserializeOwned>(kind: &str, config: serde_json::Value) -> Result<T> {
    serde_json::from_value(config)
        .map_err(|e| TransformError::config(format!("{kind} config: {e}")))
}
