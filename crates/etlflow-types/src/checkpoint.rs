//! Checkpoint records.
//!
//! A [`CheckpointRecord`] captures the intermediate state of an execution at
//! a step boundary so a later execution of the same pipeline version can
//! resume after that step.

use serde::{Deserialize, Serialize};

use crate::state::{ExecutionId, PipelineId};

/// When the executor persists checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// After every completed step.
    EveryStep,
    /// At the first step boundary once at least N rows were processed since
    /// the previous checkpoint.
    EveryRows(u64),
}

/// Persisted checkpoint.
///
/// `checkpoint_data` is the serialized intermediate state; its layout is
/// owned by the engine. Timestamps are ISO-8601 UTC strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub pipeline: PipelineId,
    pub execution_id: ExecutionId,
    pub version: String,
    /// Order of the last step completed before this checkpoint.
    pub step_index: u32,
    pub checkpoint_data: String,
    pub rows_processed: u64,
    pub created_at: String,
    pub expires_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_serde_shapes() {
        assert_eq!(
            serde_json::to_string(&CheckpointPolicy::EveryStep).unwrap(),
            "\"every_step\""
        );
        let json = serde_json::to_value(CheckpointPolicy::EveryRows(500)).unwrap();
        assert_eq!(json["every_rows"], 500);
    }

    #[test]
    fn checkpoint_record_roundtrip() {
        let cp = CheckpointRecord {
            pipeline: PipelineId::new("orders"),
            execution_id: ExecutionId::new(3),
            version: "1.0".into(),
            step_index: 2,
            checkpoint_data: "{}".into(),
            rows_processed: 40,
            created_at: "2026-01-15T10:00:00Z".into(),
            expires_at: "2026-01-16T10:00:00Z".into(),
        };
        let json = serde_json::to_string(&cp).unwrap();
        let back: CheckpointRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(cp, back);
    }
}
