//! Task data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::stage::Stage;
use super::state::TaskState;

/// Default base priority for new tasks.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Upper bound of the base priority range.
pub const MAX_PRIORITY: u8 = 100;

/// Default target language for generated code.
pub const DEFAULT_LANGUAGE: &str = "python";

/// Opaque, immutable task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh identifier of the form `TASK-xxxxxxxx`.
    pub fn new() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("TASK-{}", &uuid[..8]))
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub message: String,
}

/// Structured output of one stage for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Stage that produced this output.
    pub stage: Stage,
    /// Raw produced content (plan, code, tests, report).
    pub content: String,
    /// Stage-specific structured fields extracted from the content.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    /// Zero-based attempt within the stage that produced this output.
    pub attempt: u32,
    /// Served from the decomposition cache instead of a capability call.
    #[serde(default)]
    pub from_cache: bool,
    /// Set once the downstream validator passed this output.
    #[serde(default)]
    pub approved: bool,
    pub produced_at: DateTime<Utc>,
}

impl StageOutput {
    pub fn new(stage: Stage, content: impl Into<String>) -> Self {
        Self {
            stage,
            content: content.into(),
            details: serde_json::Value::Null,
            attempt: 0,
            from_cache: false,
            approved: false,
            produced_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Why a task ended in `FAILED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Downstream validation kept rejecting the stage output.
    ValidationExceededRetries { stage: Stage },
    /// The capability service stayed unavailable after backoff.
    CapabilityError { stage: Stage, detail: String },
    /// The stage ran past its time budget.
    StageTimeout { stage: Stage, seconds: u64 },
    /// Cancelled by a user or the system.
    Cancelled,
}

impl FailureReason {
    /// Stable reason code. A stage timeout is a capability-class failure.
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::ValidationExceededRetries { .. } => "validation_exceeded_retries",
            FailureReason::CapabilityError { .. } | FailureReason::StageTimeout { .. } => {
                "capability_error"
            }
            FailureReason::Cancelled => "cancelled",
        }
    }

    /// Human-readable explanation written to task history.
    pub fn explanation(&self) -> String {
        match self {
            FailureReason::ValidationExceededRetries { stage } => format!(
                "Failed: validation_exceeded_retries at stage {}; the reviewing worker rejected every attempt",
                stage
            ),
            FailureReason::CapabilityError { stage, detail } => format!(
                "Failed: capability_error at stage {}; the service was unavailable ({})",
                stage, detail
            ),
            FailureReason::StageTimeout { stage, seconds } => format!(
                "Failed: capability_error at stage {}; stage exceeded its {}s time budget",
                stage, seconds
            ),
            FailureReason::Cancelled => {
                "Failed: cancelled; no further stages will run".to_string()
            }
        }
    }
}

/// Unit of work flowing through the pipeline.
///
/// `state`, `retry_count`, `failure_reason` and `checkpoint` are written only
/// by the state machine and the validation loop; everything else reads them
/// through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub language: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub(crate) state: TaskState,
    pub(crate) priority: u8,
    pub created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) retry_count: u32,
    /// Tasks this task blocks. Read by scoring only.
    #[serde(default)]
    pub blocking_tasks: BTreeSet<TaskId>,
    #[serde(default)]
    pub(crate) metadata: BTreeMap<Stage, StageOutput>,
    #[serde(default)]
    pub(crate) history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) failure_reason: Option<FailureReason>,
    pub(crate) checkpoint: TaskState,
}

impl Task {
    /// Create a task in `CREATED` with default priority and language.
    pub fn new(description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            description: description.into(),
            language: DEFAULT_LANGUAGE.to_string(),
            requirements: Vec::new(),
            state: TaskState::Created,
            priority: DEFAULT_PRIORITY,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            blocking_tasks: BTreeSet::new(),
            metadata: BTreeMap::new(),
            history: Vec::new(),
            failure_reason: None,
            checkpoint: TaskState::Created,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    /// Set the base priority, clamped to [0, 100].
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = clamp_priority(priority);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    /// Declare that this task blocks `other`.
    pub fn blocks(mut self, other: TaskId) -> Self {
        self.blocking_tasks.insert(other);
        self
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        self.failure_reason.as_ref()
    }

    /// The last ready state reached; target of an operator reset.
    pub fn checkpoint(&self) -> TaskState {
        self.checkpoint
    }

    pub fn metadata(&self) -> &BTreeMap<Stage, StageOutput> {
        &self.metadata
    }

    pub fn stage_output(&self, stage: Stage) -> Option<&StageOutput> {
        self.metadata.get(&stage)
    }

    /// Explicit priority override, audited in history.
    pub fn set_priority(&mut self, priority: i64, actor: &str, reason: Option<&str>) {
        let old = self.priority;
        self.priority = clamp_priority(priority);
        self.updated_at = Utc::now();
        let message = reason.map(str::to_string).unwrap_or_else(|| {
            format!("Priority updated from {} to {}", old, self.priority)
        });
        self.record(actor, message);
    }

    /// Write a stage's output; a retry of the same stage overwrites it.
    pub(crate) fn put_stage_output(&mut self, output: StageOutput) {
        self.updated_at = Utc::now();
        self.metadata.insert(output.stage, output);
    }

    pub(crate) fn mark_approved(&mut self, stage: Stage) {
        if let Some(output) = self.metadata.get_mut(&stage) {
            output.approved = true;
        }
    }

    /// Append a history entry.
    pub(crate) fn record(&mut self, actor: &str, message: impl Into<String>) {
        self.history.push(HistoryEntry {
            timestamp: Utc::now(),
            actor: actor.to_string(),
            message: message.into(),
        });
    }
}

fn clamp_priority(priority: i64) -> u8 {
    priority.clamp(0, MAX_PRIORITY as i64) as u8
}
