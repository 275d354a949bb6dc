//! Ready-set selection.
//!
//! Scores are recomputed over the whole ready set on every call; there is no
//! heap to go stale as tasks age.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::Serialize;
use std::cmp::{Ordering, Reverse};

use super::priority::{effective_priority_with, PriorityWeights};
use crate::task::{Task, TaskId, TaskState};

/// Sort key: higher score first, then earlier `created_at`, then lower id.
type SelectionKey<'a> = (OrderedFloat<f64>, Reverse<DateTime<Utc>>, Reverse<&'a TaskId>);

fn selection_key<'a>(
    task: &'a Task,
    now: DateTime<Utc>,
    weights: &PriorityWeights,
) -> SelectionKey<'a> {
    (
        OrderedFloat(effective_priority_with(task, now, weights)),
        Reverse(task.created_at),
        Reverse(&task.id),
    )
}

/// Index of the task to dispatch next, among tasks in a ready state.
pub fn select_next(tasks: &[Task], now: DateTime<Utc>, weights: &PriorityWeights) -> Option<usize> {
    tasks
        .iter()
        .enumerate()
        .filter(|(_, task)| task.state().is_ready())
        .max_by_key(|&(_, task)| selection_key(task, now, weights))
        .map(|(index, _)| index)
}

/// A scored snapshot of one task.
#[derive(Debug, Clone, Serialize)]
pub struct RankedTask {
    pub id: TaskId,
    pub state: TaskState,
    pub base_priority: u8,
    pub effective_priority: f64,
    pub created_at: DateTime<Utc>,
}

/// All tasks ordered the way the scheduler would pick them.
pub fn rank(tasks: &[Task], now: DateTime<Utc>, weights: &PriorityWeights) -> Vec<RankedTask> {
    let mut ordered: Vec<&Task> = tasks.iter().collect();
    ordered.sort_by(|a, b| compare(b, a, now, weights));
    ordered
        .into_iter()
        .map(|task| RankedTask {
            id: task.id.clone(),
            state: task.state(),
            base_priority: task.priority(),
            effective_priority: effective_priority_with(task, now, weights),
            created_at: task.created_at,
        })
        .collect()
}

fn compare(a: &Task, b: &Task, now: DateTime<Utc>, weights: &PriorityWeights) -> Ordering {
    selection_key(a, now, weights).cmp(&selection_key(b, now, weights))
}
