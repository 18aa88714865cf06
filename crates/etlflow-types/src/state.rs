//! Execution tracking model types.
//!
//! Pure data types used by `StateBackend` implementations. Kept in the types
//! crate so both the engine and state crates can share them without circular
//! dependencies.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque pipeline identifier (the pipeline name from its config).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(String);

impl PipelineId {
    /// Create a new pipeline identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for PipelineId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Backend-assigned execution identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(i64);

impl ExecutionId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ExecutionId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Execution lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of one pipeline execution.
///
/// `Pending -> Running -> {Completed, Failed, Cancelled}`. A pending
/// execution may also fail or be cancelled before it starts. Terminal
/// states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counters accumulated over an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Rows extracted from sources.
    pub rows_processed: u64,
    /// Rows accepted by destinations.
    pub rows_successful: u64,
    /// Rows rejected by validation.
    pub rows_failed: u64,
}

/// Failure details recorded when an execution ends in `Failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub message: String,
    /// Order of the step that failed, if the failure is tied to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    /// Full rendered error chain.
    pub log: String,
}

/// Persisted view of one execution.
///
/// Timestamps are ISO-8601 UTC strings; backends handle formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub pipeline: PipelineId,
    pub version: String,
    pub status: ExecutionStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(flatten)]
    pub stats: ExecutionStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<ExecutionId>,
    #[serde(default)]
    pub cancel_requested: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_id_display_and_as_str() {
        let pid = PipelineId::new("customers_daily");
        assert_eq!(pid.as_str(), "customers_daily");
        assert_eq!(pid.to_string(), "customers_daily");
    }

    #[test]
    fn pipeline_id_serde_transparent() {
        let json = serde_json::to_string(&PipelineId::new("p")).unwrap();
        assert_eq!(json, "\"p\"");
        let json = serde_json::to_string(&ExecutionId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn status_as_str_roundtrips_through_parse() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("paused"), None);
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(ExecutionStatus::Running));
            assert!(!terminal.can_transition_to(ExecutionStatus::Failed));
        }
    }

    #[test]
    fn running_only_moves_to_terminal() {
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Running));
        assert!(ExecutionStatus::Running.can_transition_to(ExecutionStatus::Completed));
        assert!(!ExecutionStatus::Running.can_transition_to(ExecutionStatus::Pending));
        assert!(!ExecutionStatus::Running.can_transition_to(ExecutionStatus::Running));
    }

    #[test]
    fn execution_stats_flatten_into_execution() {
        let exec = Execution {
            id: ExecutionId::new(1),
            pipeline: PipelineId::new("p"),
            version: "1.0".into(),
            status: ExecutionStatus::Completed,
            created_at: "2026-01-15T10:00:00Z".into(),
            started_at: None,
            finished_at: None,
            stats: ExecutionStats {
                rows_processed: 5,
                rows_successful: 2,
                rows_failed: 0,
            },
            current_step: None,
            error_message: None,
            error_step: None,
            execution_log: None,
            resumed_from: None,
            cancel_requested: false,
        };
        let json = serde_json::to_value(&exec).unwrap();
        assert_eq!(json["rows_processed"], 5);
        assert_eq!(json["status"], "completed");
        assert!(json.get("error_message").is_none());
    }
}
