//! Execution mode types for pipeline runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use etlflow_types::state::ExecutionId;

/// Runtime execution options (not part of pipeline YAML config).
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Cap every extraction and the dataset entering the first transform.
    /// Destinations still run.
    pub sample_size: Option<usize>,
    /// Continue after the latest checkpoint of this earlier execution.
    pub resume_from: Option<ExecutionId>,
    /// Cooperative cancellation flag, checked at step boundaries.
    pub cancel: CancelHandle,
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the execution to stop before its next step.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_options_default_is_full_run() {
        let opts = ExecutionOptions::default();
        assert!(opts.sample_size.is_none());
        assert!(opts.resume_from.is_none());
        assert!(!opts.cancel.is_cancelled());
    }

    #[test]
    fn cancel_handle_is_shared_between_clones() {
        let handle = CancelHandle::new();
        let observer = handle.clone();
        handle.cancel();
        assert!(observer.is_cancelled());
    }
}
