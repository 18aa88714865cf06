//! Transformation error types.

/// Errors produced by transformation operators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// The operator configuration is invalid. Raised before any row is read.
    #[error("invalid config: {0}")]
    Config(String),

    /// The data does not fit the configuration.
    #[error("data error{}: {message}", location(.column, .row))]
    Data {
        column: Option<String>,
        row: Option<usize>,
        message: String,
    },
}

fn location(column: &Option<String>, row: &Option<usize>) -> String {
    match (column, row) {
        (Some(c), Some(r)) => format!(" in column '{c}' at row {r}"),
        (Some(c), None) => format!(" in column '{c}'"),
        (None, Some(r)) => format!(" at row {r}"),
        (None, None) => String::new(),
    }
}

impl TransformError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn missing_column(column: &str) -> Self {
        Self::Data {
            column: Some(column.to_string()),
            row: None,
            message: format!("column '{column}' not found in dataset"),
        }
    }

    pub fn at_row(column: impl Into<String>, row: usize, message: impl Into<String>) -> Self {
        Self::Data {
            column: Some(column.into()),
            row: Some(row),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;
