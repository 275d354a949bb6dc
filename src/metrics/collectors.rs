//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library users
//! and tests that never initialize metrics pay nothing.

use super::prometheus::{
    ACTIVE_STAGES, CACHE_LOOKUPS_TOTAL, CAPABILITY_ERRORS_TOTAL, READY_QUEUE_DEPTH, STAGE_DURATION,
    TASKS_FINISHED_TOTAL, TRANSITIONS_TOTAL, VALIDATIONS_TOTAL,
};
use crate::pipeline::events::StateChange;
use crate::task::Stage;

/// Metrics collector for recording devflow operational metrics.
///
/// # Example
///
/// ```ignore
/// use devflow::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_validation(Stage::Decomposition, false);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a state transition, and the task's outcome if it is terminal.
    pub fn record_transition(&self, change: &StateChange) {
        if let Some(transitions) = TRANSITIONS_TOTAL.get() {
            transitions
                .with_label_values(&[change.from.as_str(), change.to.as_str()])
                .inc();
        }

        if change.to.is_terminal() {
            if let Some(finished) = TASKS_FINISHED_TOTAL.get() {
                finished.with_label_values(&[change.to.as_str()]).inc();
            }
        }

        tracing::trace!(from = %change.from, to = %change.to, "Recorded transition metric");
    }

    /// Record a verdict on `stage`'s output.
    pub fn record_validation(&self, stage: Stage, passed: bool) {
        if let Some(validations) = VALIDATIONS_TOTAL.get() {
            let outcome = if passed { "passed" } else { "rejected" };
            validations
                .with_label_values(&[stage.as_str(), outcome])
                .inc();
        }
    }

    /// Record a capability call that exhausted backoff.
    pub fn record_capability_error(&self, stage: Stage, kind: &str) {
        if let Some(errors) = CAPABILITY_ERRORS_TOTAL.get() {
            errors.with_label_values(&[stage.as_str(), kind]).inc();
        }
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if let Some(lookups) = CACHE_LOOKUPS_TOTAL.get() {
            let result = if hit { "hit" } else { "miss" };
            lookups.with_label_values(&[result]).inc();
        }
    }

    /// Record a finished stage run and release its active slot.
    pub fn record_stage_finished(&self, stage: Stage, duration_secs: f64) {
        if let Some(duration) = STAGE_DURATION.get() {
            duration
                .with_label_values(&[stage.as_str()])
                .observe(duration_secs);
        }
        if let Some(active) = ACTIVE_STAGES.get() {
            active.dec();
        }
    }

    pub fn record_stage_started(&self) {
        if let Some(active) = ACTIVE_STAGES.get() {
            active.inc();
        }
    }

    pub fn set_ready_queue_depth(&self, depth: usize) {
        if let Some(gauge) = READY_QUEUE_DEPTH.get() {
            gauge.set(depth as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};
    use crate::task::{TaskId, TaskState};
    use chrono::Utc;

    #[test]
    fn test_collector_without_init_does_not_panic() {
        let collector = MetricsCollector::new();
        collector.record_validation(Stage::Testing, true);
        collector.record_cache_lookup(false);
        collector.set_ready_queue_depth(3);
    }

    #[test]
    fn test_recorded_values_are_exported() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();

        collector.record_transition(&StateChange {
            task_id: TaskId::from_string("TASK-m"),
            from: TaskState::Integrating,
            to: TaskState::Completed,
            timestamp: Utc::now(),
        });
        collector.record_validation(Stage::QualityAssessment, false);
        collector.record_capability_error(Stage::Implementation, "rate_limited");
        collector.record_stage_started();
        collector.record_stage_finished(Stage::Implementation, 1.5);

        let text = export_metrics();
        assert!(text.contains("devflow_tasks_finished_total"));
        assert!(text.contains("outcome=\"rejected\""));
        assert!(text.contains("kind=\"rate_limited\""));
        assert!(text.contains("devflow_stage_duration_seconds"));
    }
}
