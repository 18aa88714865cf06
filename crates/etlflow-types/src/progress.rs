//! Progress events published while an execution runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ExecutionId;

/// Outcome carried by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Execution started; no step finished yet.
    Started,
    /// A step finished.
    Running,
    /// Every step finished; follows the last step's `Running` event.
    Completed,
    Failed,
    Cancelled,
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub execution_id: ExecutionId,
    /// Order of the step the event refers to (0 before any step ran).
    pub step_index: u32,
    pub status: ProgressStatus,
    /// Completed steps over total steps, 0..=100.
    pub progress_percent: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn now(
        execution_id: ExecutionId,
        step_index: u32,
        status: ProgressStatus,
        progress_percent: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id,
            step_index,
            status,
            progress_percent: progress_percent.clamp(0.0, 100.0),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Percentage of `done` over `total`, rounded to one decimal.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((done as f64 / total as f64) * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_to_one_decimal() {
        assert!((percent(1, 3) - 33.3).abs() < f64::EPSILON);
        assert!((percent(3, 3) - 100.0).abs() < f64::EPSILON);
        assert!((percent(0, 0) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn event_percent_is_clamped() {
        let ev = ProgressEvent::now(ExecutionId::new(1), 1, ProgressStatus::Running, 140.0, "x");
        assert!((ev.progress_percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ProgressStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
