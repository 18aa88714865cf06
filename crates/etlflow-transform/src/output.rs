//! Operator results and their reporting shape.

use etlflow_types::Dataset;
use serde::{Deserialize, Serialize};

use crate::error::TransformError;
use crate::validate::ValidationDetails;

/// Dataset produced by an operator plus what it did.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub data: Dataset,
    pub metadata: TransformMetadata,
}

impl TransformOutput {
    pub(crate) fn new(original_count: usize, data: Dataset, details: OperatorDetails) -> Self {
        let result_count = data.len();
        Self {
            data,
            metadata: TransformMetadata {
                original_count,
                result_count,
                details,
            },
        }
    }
}

/// Counts shared by every operator, plus kind-specific details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformMetadata {
    pub original_count: usize,
    pub result_count: usize,
    #[serde(flatten)]
    pub details: OperatorDetails,
}

impl TransformMetadata {
    /// Records judged invalid by a VALIDATE step; zero for other operators.
    #[must_use]
    pub fn invalid_count(&self) -> usize {
        match &self.details {
            OperatorDetails::Validate(v) => v.invalid_count,
            _ => 0,
        }
    }
}

/// Kind-specific metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum OperatorDetails {
    Join {
        how: String,
        matched_pairs: usize,
        left_unmatched: usize,
        right_unmatched: usize,
    },
    Deduplicate {
        strategy: String,
        duplicates_removed: usize,
    },
    Validate(ValidationDetails),
    Aggregate {
        groups: usize,
    },
    Filter {
        filtered_out: usize,
    },
    Sort {
        columns: Vec<String>,
    },
    Map {
        columns: Vec<String>,
    },
    Calculate {
        column: String,
        null_results: usize,
    },
}

/// `status`/`data`/`metadata`/`message` shape handed to reporting layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformReport {
    /// `"success"` or `"error"`.
    pub status: String,
    pub data: Dataset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TransformMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TransformReport {
    #[must_use]
    pub fn from_result(result: Result<TransformOutput, TransformError>) -> Self {
        match result {
            Ok(output) => Self {
                status: "success".into(),
                message: Some(format!(
                    "{} records in, {} records out",
                    output.metadata.original_count, output.metadata.result_count
                )),
                data: output.data,
                metadata: Some(output.metadata),
            },
            Err(e) => Self {
                status: "error".into(),
                data: Vec::new(),
                metadata: None,
                message: Some(e.to_string()),
            },
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}
