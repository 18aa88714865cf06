//! Results returned by connector operations.

use serde::{Deserialize, Serialize};

/// Result of a destination load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub status: String,
    pub rows_loaded: u64,
    pub load_time_seconds: f64,
}

impl LoadSummary {
    #[must_use]
    pub fn success(rows_loaded: u64, load_time_seconds: f64) -> Self {
        Self {
            status: "success".into(),
            rows_loaded,
            load_time_seconds,
        }
    }
}

/// Result of a source connection test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// `"success"` or `"failed"`.
    pub status: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ConnectionStatus {
    #[must_use]
    pub fn success(details: serde_json::Value) -> Self {
        Self {
            status: "success".into(),
            details,
        }
    }

    #[must_use]
    pub fn failed(details: serde_json::Value) -> Self {
        Self {
            status: "failed".into(),
            details,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}
