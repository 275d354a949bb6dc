//! In-memory task store with operator actions.
//!
//! Holds tasks between runs and exposes the explicit operator surface:
//! priority overrides, rebalancing, and the two actions allowed on a
//! failed task (discard and reset).

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use super::model::{Task, TaskId, MAX_PRIORITY};
use super::state::{StateMachine, TaskState};
use crate::error::StoreError;
use crate::pipeline::events::StateChange;

/// Shared, async-safe task collection.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new task.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateTask` if the id is already present.
    pub async fn insert(&self, task: Task) -> Result<TaskId, StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id.clone()));
        }
        let id = task.id.clone();
        tasks.insert(id.clone(), task);
        Ok(id)
    }

    /// Insert or replace tasks, typically the result of a run.
    pub async fn upsert_all(&self, updated: Vec<Task>) {
        let mut tasks = self.tasks.write().await;
        for task in updated {
            tasks.insert(task.id.clone(), task);
        }
    }

    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// All tasks, oldest first.
    pub async fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    pub async fn list_by_state(&self, state: TaskState) -> Vec<Task> {
        self.list()
            .await
            .into_iter()
            .filter(|task| task.state() == state)
            .collect()
    }

    /// Tasks that still have stages to run.
    pub async fn runnable(&self) -> Vec<Task> {
        self.list()
            .await
            .into_iter()
            .filter(|task| !task.state().is_terminal())
            .collect()
    }

    /// Explicit priority override for one task.
    pub async fn set_priority(
        &self,
        id: &TaskId,
        priority: i64,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        task.set_priority(priority, "operator", reason);
        Ok(())
    }

    /// Bulk priority override. Returns the ids that were updated; unknown ids
    /// are skipped.
    pub async fn update_priorities(&self, updates: &HashMap<TaskId, i64>) -> Vec<TaskId> {
        let mut tasks = self.tasks.write().await;
        let mut updated = Vec::new();
        for (id, priority) in updates {
            if let Some(task) = tasks.get_mut(id) {
                task.set_priority(*priority, "operator", Some("Bulk priority update"));
                updated.push(id.clone());
            }
        }
        updated.sort();
        updated
    }

    /// Spread priorities evenly across non-terminal tasks, keeping their
    /// current relative order. The highest keeps 100, each next one steps
    /// down by `100 / count`.
    pub async fn rebalance_priorities(&self) -> usize {
        let mut tasks = self.tasks.write().await;
        let mut order: Vec<(u8, chrono::DateTime<chrono::Utc>, TaskId)> = tasks
            .values()
            .filter(|task| !task.state().is_terminal())
            .map(|task| (task.priority(), task.created_at, task.id.clone()))
            .collect();
        if order.is_empty() {
            return 0;
        }

        // Highest priority first; older tasks win ties.
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let step = f64::from(MAX_PRIORITY) / order.len() as f64;
        for (index, (_, _, id)) in order.iter().enumerate() {
            let priority = (f64::from(MAX_PRIORITY) - index as f64 * step).round() as i64;
            if let Some(task) = tasks.get_mut(id) {
                task.set_priority(priority, "operator", Some("Priority rebalanced"));
            }
        }

        info!(count = order.len(), "Rebalanced task priorities");
        order.len()
    }

    /// Remove a failed task for good.
    pub async fn discard(&self, id: &TaskId) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        if task.state() != TaskState::Failed {
            return Err(crate::error::TransitionError::NotFailed {
                task_id: id.clone(),
                state: task.state(),
            }
            .into());
        }
        let removed = tasks
            .remove(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        info!(task_id = %id, "Discarded failed task");
        Ok(removed)
    }

    /// Reset a failed task to its checkpoint through the state machine.
    pub async fn reset(
        &self,
        id: &TaskId,
        machine: &StateMachine,
        operator: &str,
    ) -> Result<StateChange, StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        let change = machine.reset(task, operator)?;
        info!(task_id = %id, to = %change.to, operator, "Reset failed task");
        Ok(change)
    }
}
