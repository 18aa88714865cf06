//! Pipeline error model.

use etlflow_transform::TransformError;
use etlflow_types::error::ConnectorError;

// ---------------------------------------------------------------------------
// PipelineError: categorised errors for the worker layer
// ---------------------------------------------------------------------------

/// Categorized pipeline error.
///
/// `Connector` wraps a typed [`ConnectorError`] whose `retryable` hint is
/// surfaced through [`PipelineError::is_retryable`]. The executor itself
/// never retries; an outer worker layer decides.
///
/// `Infrastructure` wraps opaque host-side errors (state backend, task
/// join failures, checkpoint decoding, invalid pipeline config) that are
/// never retryable.
#[derive(Debug)]
pub enum PipelineError {
    /// Typed connector error with retry metadata.
    Connector(ConnectorError),
    /// A transform step rejected its config or its input data.
    Transform { step: u32, source: TransformError },
    /// Execution stopped at a step boundary after a cancel request.
    Cancelled,
    /// Infrastructure error (state backend, task join, checkpoint, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connector(e) => write!(f, "{e}"),
            Self::Transform { step, source } => write!(f, "transform step {step} failed: {source}"),
            Self::Cancelled => f.write_str("execution cancelled"),
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<ConnectorError> for PipelineError {
    fn from(e: ConnectorError) -> Self {
        Self::Connector(e)
    }
}

impl PipelineError {
    /// Returns `true` if this is a typed connector error that the connector
    /// has marked as retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connector(e) => e.retryable,
            Self::Transform { .. } | Self::Cancelled | Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed connector error if this is a `Connector` variant.
    #[must_use]
    pub fn as_connector_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::Connector(e) => Some(e),
            _ => None,
        }
    }

    /// Full rendering stored in an execution's log: the message plus every
    /// cause and connector details.
    #[must_use]
    pub fn render_chain(&self) -> String {
        match self {
            Self::Infrastructure(e) => format!("{e:?}"),
            Self::Connector(e) => match &e.details {
                Some(details) => format!("{e}\n\nDetails: {details}"),
                None => e.to_string(),
            },
            Self::Transform { source, .. } => {
                format!("{self}\n\nCaused by:\n    {source:?}")
            }
            Self::Cancelled => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use etlflow_types::error::ErrorCategory;

    #[test]
    fn test_pipeline_error_connector_is_retryable() {
        let err = PipelineError::Connector(ConnectorError::connection(
            "CONN_RESET",
            "connection reset by peer",
        ));
        assert!(err.is_retryable());
        let ce = err.as_connector_error().unwrap();
        assert_eq!(ce.category, ErrorCategory::Connection);
    }

    #[test]
    fn test_pipeline_error_connector_not_retryable() {
        let err =
            PipelineError::Connector(ConnectorError::config("MISSING_PATH", "path is required"));
        assert!(!err.is_retryable());
        assert_eq!(err.as_connector_error().unwrap().category, ErrorCategory::Config);
    }

    #[test]
    fn test_pipeline_error_infrastructure_not_retryable() {
        let err = PipelineError::Infrastructure(anyhow::anyhow!("state backend unavailable"));
        assert!(!err.is_retryable());
        assert!(err.as_connector_error().is_none());
    }

    #[test]
    fn test_pipeline_error_from_anyhow() {
        let pe: PipelineError = anyhow::anyhow!("something went wrong").into();
        assert!(matches!(pe, PipelineError::Infrastructure(_)));
    }

    #[test]
    fn test_transform_error_display_names_step() {
        let err = PipelineError::Transform {
            step: 2,
            source: TransformError::missing_column("age"),
        };
        assert!(!err.is_retryable());
        let msg = err.to_string();
        assert!(msg.starts_with("transform step 2 failed"));
        assert!(msg.contains("age"));
    }

    #[test]
    fn test_render_chain_includes_causes() {
        let inner: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"));
        let err = PipelineError::Infrastructure(
            inner.context("Failed to open state DB").unwrap_err(),
        );
        assert_eq!(err.to_string(), "Failed to open state DB");
        let chain = err.render_chain();
        assert!(chain.contains("Failed to open state DB"));
        assert!(chain.contains("no such file"));
    }

    #[test]
    fn test_render_chain_includes_connector_details() {
        let err = PipelineError::Connector(
            ConnectorError::data("PARSE", "bad json").with_details(serde_json::json!({"line": 4})),
        );
        assert!(err.render_chain().contains("\"line\":4"));
    }
}
