//! Outbound notifications.
//!
//! Sinks are synchronous and must not block: the workflow calls them inline
//! after every transition and every verdict. Delivery is best-effort.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::feedback::ValidationVerdict;
use crate::task::{Stage, TaskId, TaskState};

/// A task moved between lifecycle states.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub task_id: TaskId,
    pub from: TaskState,
    pub to: TaskState,
    pub timestamp: DateTime<Utc>,
}

/// A verdict was returned at a stage boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackNotice {
    pub task_id: TaskId,
    /// Stage of the validating worker.
    pub source_stage: Stage,
    /// Stage whose output was validated.
    pub target_stage: Stage,
    pub verdict: ValidationVerdict,
    pub retry_index: u32,
}

/// Either kind of notification, for channel consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StateChange(StateChange),
    Feedback(FeedbackNotice),
}

/// Receiver of workflow notifications.
pub trait NotificationSink: Send + Sync {
    fn on_state_change(&self, change: &StateChange);

    fn on_feedback(&self, _notice: &FeedbackNotice) {}
}

/// Forwards notifications into a bounded channel, dropping them when the
/// channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<WorkflowEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<WorkflowEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: WorkflowEvent) {
        if let Err(err) = self.tx.try_send(event) {
            debug!(error = %err, "Dropped workflow notification");
        }
    }
}

impl NotificationSink for ChannelSink {
    fn on_state_change(&self, change: &StateChange) {
        self.send(WorkflowEvent::StateChange(change.clone()));
    }

    fn on_feedback(&self, notice: &FeedbackNotice) {
        self.send(WorkflowEvent::Feedback(notice.clone()));
    }
}

/// A channel sink and the receiving end.
pub fn channel_sink(buffer: usize) -> (ChannelSink, mpsc::Receiver<WorkflowEvent>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (ChannelSink::new(tx), rx)
}

/// Logs every notification through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn on_state_change(&self, change: &StateChange) {
        info!(
            task_id = %change.task_id,
            from = %change.from,
            to = %change.to,
            "Task state changed"
        );
    }

    fn on_feedback(&self, notice: &FeedbackNotice) {
        info!(
            task_id = %notice.task_id,
            source = %notice.source_stage,
            target = %notice.target_stage,
            passed = notice.verdict.passed(),
            confidence = notice.verdict.confidence(),
            retry_index = notice.retry_index,
            "Validation verdict"
        );
    }
}

/// Fans notifications out to every registered sink.
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn state_change(&self, change: &StateChange) {
        for sink in &self.sinks {
            sink.on_state_change(change);
        }
    }

    pub fn feedback(&self, notice: &FeedbackNotice) {
        for sink in &self.sinks {
            sink.on_feedback(notice);
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(to: TaskState) -> StateChange {
        StateChange {
            task_id: TaskId::from_string("TASK-1"),
            from: TaskState::Created,
            to,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = channel_sink(8);
        let notifier = Notifier::new().with_sink(Arc::new(sink));

        notifier.state_change(&change(TaskState::Decomposing));
        notifier.feedback(&FeedbackNotice {
            task_id: TaskId::from_string("TASK-1"),
            source_stage: Stage::Implementation,
            target_stage: Stage::Decomposition,
            verdict: ValidationVerdict::pass(0.9),
            retry_index: 0,
        });

        assert!(matches!(
            rx.recv().await,
            Some(WorkflowEvent::StateChange(c)) if c.to == TaskState::Decomposing
        ));
        assert!(matches!(rx.recv().await, Some(WorkflowEvent::Feedback(n)) if n.retry_index == 0));
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sink, mut rx) = channel_sink(1);
        sink.on_state_change(&change(TaskState::Decomposing));
        sink.on_state_change(&change(TaskState::Failed));

        assert!(matches!(
            rx.try_recv(),
            Ok(WorkflowEvent::StateChange(c)) if c.to == TaskState::Decomposing
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (sink, rx) = channel_sink(1);
        drop(rx);
        sink.on_state_change(&change(TaskState::Decomposing));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = WorkflowEvent::StateChange(change(TaskState::Decomposing));
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["type"], "state_change");
        assert_eq!(json["to"], "DECOMPOSING");
        assert_eq!(json["task_id"], "TASK-1");
    }
}
