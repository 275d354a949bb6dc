//! Effective priority scoring.
//!
//! ```text
//! effective = base + min(age_hours, age_cap) + dependency_boost + failure_boost
//! ```
//!
//! The score depends on `now`, so it is recomputed at every scheduling
//! decision and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::Task;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Boost constants for effective priority.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityWeights {
    /// Maximum hours of age credited to a task.
    pub age_cap_hours: f64,
    /// Added when the task blocks at least one other task.
    pub dependency_boost: f64,
    /// Added when `retry_count > 0`. Flat, regardless of how many cycles
    /// failed.
    ///
    /// `retry_count` is only non-zero while a stage is active: approval and
    /// operator reset both clear it. Selection only scores ready tasks, so
    /// this boost never changes a scheduling decision made by the
    /// orchestrator. It only shows up when scoring a task caught mid-stage.
    pub failure_boost: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            age_cap_hours: 20.0,
            dependency_boost: 10.0,
            failure_boost: 15.0,
        }
    }
}

/// Effective priority with the default weights.
pub fn effective_priority(task: &Task, now: DateTime<Utc>) -> f64 {
    effective_priority_with(task, now, &PriorityWeights::default())
}

/// Effective priority with explicit weights.
///
/// A `now` earlier than `created_at` counts as zero age.
pub fn effective_priority_with(task: &Task, now: DateTime<Utc>, weights: &PriorityWeights) -> f64 {
    let age_ms = (now - task.created_at).num_milliseconds().max(0);
    let age_hours = age_ms as f64 / MILLIS_PER_HOUR;
    let age_boost = age_hours.min(weights.age_cap_hours);

    let dependency_boost = if task.blocking_tasks.is_empty() {
        0.0
    } else {
        weights.dependency_boost
    };

    let failure_boost = if task.retry_count() > 0 {
        weights.failure_boost
    } else {
        0.0
    };

    f64::from(task.priority()) + age_boost + dependency_boost + failure_boost
}
