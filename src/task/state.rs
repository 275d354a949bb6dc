//! Task lifecycle states and the state machine that guards them.
//!
//! The lifecycle is a single forward chain:
//!
//! ```text
//! CREATED -> DECOMPOSING -> READY_FOR_IMPLEMENTATION -> IMPLEMENTING
//!   -> READY_FOR_TESTING -> TESTING -> READY_FOR_QUALITY -> QUALITY_CHECK
//!   -> READY_FOR_INTEGRATION -> INTEGRATING -> COMPLETED
//! ```
//!
//! `FAILED` is reachable from every non-terminal state. From `FAILED` the
//! only way back is an explicit operator reset to the last checkpoint.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::model::{FailureReason, Task};
use super::stage::Stage;
use crate::error::TransitionError;
use crate::pipeline::events::StateChange;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Created,
    Decomposing,
    ReadyForImplementation,
    Implementing,
    ReadyForTesting,
    Testing,
    ReadyForQuality,
    QualityCheck,
    ReadyForIntegration,
    Integrating,
    Completed,
    Failed,
}

impl TaskState {
    /// The forward sequence, excluding `Failed`.
    pub const SEQUENCE: [TaskState; 11] = [
        TaskState::Created,
        TaskState::Decomposing,
        TaskState::ReadyForImplementation,
        TaskState::Implementing,
        TaskState::ReadyForTesting,
        TaskState::Testing,
        TaskState::ReadyForQuality,
        TaskState::QualityCheck,
        TaskState::ReadyForIntegration,
        TaskState::Integrating,
        TaskState::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Created => "CREATED",
            TaskState::Decomposing => "DECOMPOSING",
            TaskState::ReadyForImplementation => "READY_FOR_IMPLEMENTATION",
            TaskState::Implementing => "IMPLEMENTING",
            TaskState::ReadyForTesting => "READY_FOR_TESTING",
            TaskState::Testing => "TESTING",
            TaskState::ReadyForQuality => "READY_FOR_QUALITY",
            TaskState::QualityCheck => "QUALITY_CHECK",
            TaskState::ReadyForIntegration => "READY_FOR_INTEGRATION",
            TaskState::Integrating => "INTEGRATING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        }
    }

    /// The next state along the forward sequence.
    pub fn successor(&self) -> Option<TaskState> {
        let index = Self::SEQUENCE.iter().position(|s| s == self)?;
        Self::SEQUENCE.get(index + 1).copied()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Whether a task in this state is waiting for its next stage to start.
    ///
    /// `Created` counts as ready: it waits for decomposition.
    pub fn is_ready(&self) -> bool {
        self.pending_stage().is_some()
    }

    /// Whether a stage is currently in progress.
    pub fn is_active(&self) -> bool {
        Stage::ALL.iter().any(|stage| stage.active_state() == *self)
    }

    /// The stage a ready task will run next.
    pub fn pending_stage(&self) -> Option<Stage> {
        Stage::ALL
            .iter()
            .find(|stage| stage.ready_state() == *self)
            .copied()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default history message for a transition without an explicit one.
fn default_message(state: TaskState) -> String {
    format!("Status updated to {}", state.as_str().to_lowercase())
}

/// Guards every write to `Task::state`.
///
/// Only the orchestrator holds one of these; everything else reads state.
pub struct StateMachine {
    valid_transitions: HashMap<TaskState, Vec<TaskState>>,
}

impl StateMachine {
    /// Build the machine with the forward chain plus `FAILED` from every
    /// non-terminal state.
    pub fn new() -> Self {
        let mut valid_transitions = HashMap::new();

        for state in TaskState::SEQUENCE {
            let targets = match state.successor() {
                Some(next) => vec![next, TaskState::Failed],
                None => vec![],
            };
            valid_transitions.insert(state, targets);
        }
        valid_transitions.insert(TaskState::Failed, vec![]);

        Self { valid_transitions }
    }

    /// Check if a transition between two states is allowed.
    pub fn can_transition(&self, from: TaskState, to: TaskState) -> bool {
        self.valid_transitions
            .get(&from)
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }

    /// Move a task to `to`, appending a history entry.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError::InvalidTransition` for any move off the
    /// graph, and `CompletionRequirementsNotMet` when entering `COMPLETED`
    /// without every stage output present and the final output approved.
    pub fn transition(
        &self,
        task: &mut Task,
        to: TaskState,
        actor: &str,
        message: Option<&str>,
    ) -> Result<StateChange, TransitionError> {
        let from = task.state;

        if !self.can_transition(from, to) {
            return Err(TransitionError::InvalidTransition {
                task_id: task.id.clone(),
                from,
                to,
            });
        }

        if to == TaskState::Completed {
            self.check_completion_requirements(task)?;
        }

        let now = Utc::now();
        task.state = to;
        task.updated_at = now;
        if to.is_ready() {
            task.checkpoint = to;
        }
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| default_message(to));
        task.record(actor, message);

        Ok(StateChange {
            task_id: task.id.clone(),
            from,
            to,
            timestamp: now,
        })
    }

    /// Move a task to `FAILED`, recording why in history and `failure_reason`.
    pub fn fail(
        &self,
        task: &mut Task,
        reason: FailureReason,
        actor: &str,
    ) -> Result<StateChange, TransitionError> {
        let explanation = reason.explanation();
        let change = self.transition(task, TaskState::Failed, actor, Some(&explanation))?;
        task.failure_reason = Some(reason);
        Ok(change)
    }

    /// Operator reset of a failed task to its last checkpoint.
    ///
    /// Clears `retry_count` and `failure_reason`. The reset itself is
    /// recorded in history with the acting operator.
    pub fn reset(&self, task: &mut Task, actor: &str) -> Result<StateChange, TransitionError> {
        if task.state != TaskState::Failed {
            return Err(TransitionError::NotFailed {
                task_id: task.id.clone(),
                state: task.state,
            });
        }

        let now = Utc::now();
        let from = task.state;
        let to = task.checkpoint;
        let previous = task
            .failure_reason
            .take()
            .map(|reason| reason.code())
            .unwrap_or("unknown");

        task.state = to;
        task.retry_count = 0;
        task.updated_at = now;
        task.record(
            actor,
            format!("Reset from FAILED ({}) to {} by {}", previous, to, actor),
        );

        Ok(StateChange {
            task_id: task.id.clone(),
            from,
            to,
            timestamp: now,
        })
    }

    fn check_completion_requirements(&self, task: &Task) -> Result<(), TransitionError> {
        let missing: Vec<&str> = Stage::ALL
            .iter()
            .filter(|stage| task.stage_output(**stage).is_none())
            .map(|stage| stage.as_str())
            .collect();

        if !missing.is_empty() {
            return Err(TransitionError::CompletionRequirementsNotMet {
                task_id: task.id.clone(),
                reason: format!("missing stage outputs: {}", missing.join(", ")),
            });
        }

        let approved = task
            .stage_output(Stage::Integration)
            .map(|output| output.approved)
            .unwrap_or(false);
        if !approved {
            return Err(TransitionError::CompletionRequirementsNotMet {
                task_id: task.id.clone(),
                reason: "integration output has not passed validation".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
