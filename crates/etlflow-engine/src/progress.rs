//! Progress sinks.
//!
//! The executor publishes a [`ProgressEvent`] when an execution starts,
//! after every step, and when it stops. Sinks must not block.

use std::sync::Mutex;

use etlflow_types::progress::{ProgressEvent, ProgressStatus};
use tokio::sync::mpsc;

/// Receives progress events from a running execution.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: &ProgressEvent) {
        match event.status {
            ProgressStatus::Failed => tracing::warn!(
                execution_id = event.execution_id.get(),
                step = event.step_index,
                percent = event.progress_percent,
                "{}",
                event.message
            ),
            _ => tracing::info!(
                execution_id = event.execution_id.get(),
                step = event.step_index,
                status = ?event.status,
                percent = event.progress_percent,
                "{}",
                event.message
            ),
        }
    }
}

/// Forwards events to a tokio channel. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    /// Build a sink plus the receiver for its events.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: &ProgressEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!("Progress receiver dropped");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for CollectingProgress {
    fn emit(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use etlflow_types::state::ExecutionId;

    fn event(status: ProgressStatus) -> ProgressEvent {
        ProgressEvent::now(ExecutionId::new(1), 2, status, 50.0, "step 2 done")
    }

    #[test]
    fn collecting_sink_keeps_order() {
        let sink = CollectingProgress::new();
        sink.emit(&event(ProgressStatus::Started));
        sink.emit(&event(ProgressStatus::Running));
        let statuses: Vec<_> = sink.events().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![ProgressStatus::Started, ProgressStatus::Running]);
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelProgress::channel();
        sink.emit(&event(ProgressStatus::Completed));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.status, ProgressStatus::Completed);
        assert_eq!(received.step_index, 2);
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelProgress::channel();
        drop(rx);
        sink.emit(&event(ProgressStatus::Failed));
    }

    #[test]
    fn sinks_are_object_safe() {
        let sinks: Vec<Box<dyn ProgressSink>> = vec![
            Box::new(TracingProgress),
            Box::new(NoopProgress),
            Box::new(CollectingProgress::new()),
        ];
        for sink in &sinks {
            sink.emit(&event(ProgressStatus::Running));
        }
    }
}
