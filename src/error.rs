//! Error types for devflow operations.
//!
//! Each subsystem owns a focused error enum:
//! - LLM transport and API failures (`LlmError`)
//! - Stage capability failures seen by the workflow (`CapabilityError`)
//! - Task state machine contract violations (`TransitionError`)
//! - Task store operations (`StoreError`)
//!
//! `DevflowError` ties them together for callers that drive a whole run.

use thiserror::Error;

use crate::pipeline::config::ConfigError;
use crate::task::{TaskId, TaskState};

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Context length exceeded: {limit} tokens")]
    ContextLengthExceeded { limit: u32 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Failure of a stage capability call (produce or validate).
///
/// These are transport/service failures, never a judgment on the work itself:
/// a rejected output is a `ValidationVerdict`, not an error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("capability call timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl CapabilityError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CapabilityError::Transport(_) => "transport",
            CapabilityError::Timeout { .. } => "timeout",
            CapabilityError::RateLimited(_) => "rate_limited",
            CapabilityError::MalformedResponse(_) => "malformed_response",
        }
    }
}

impl From<LlmError> for CapabilityError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited(msg) => CapabilityError::RateLimited(msg),
            LlmError::ParseError(msg) => CapabilityError::MalformedResponse(msg),
            other => CapabilityError::Transport(other.to_string()),
        }
    }
}

/// Rejected task state machine operations.
///
/// These signal a broken caller contract and are never coerced into a
/// different transition.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransitionError {
    #[error("Invalid state transition for task {task_id} from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("Task {task_id} cannot complete: {reason}")]
    CompletionRequirementsNotMet { task_id: TaskId, reason: String },

    #[error("Task {task_id} is in state {state}; operation requires FAILED")]
    NotFailed { task_id: TaskId, state: TaskState },
}

/// Errors that can occur during task store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task '{0}' not found")]
    TaskNotFound(TaskId),

    #[error("Task '{0}' already exists")]
    DuplicateTask(TaskId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Top-level error for a devflow run.
#[derive(Debug, Error)]
pub enum DevflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("State machine error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Task store error: {0}")]
    Store(#[from] StoreError),

    /// Tasks handed to a run that cannot be scheduled as given.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result alias for devflow operations.
pub type Result<T> = std::result::Result<T, DevflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_maps_to_capability_error() {
        let rate = CapabilityError::from(LlmError::RateLimited("slow down".to_string()));
        assert_eq!(rate, CapabilityError::RateLimited("slow down".to_string()));

        let parse = CapabilityError::from(LlmError::ParseError("bad json".to_string()));
        assert_eq!(parse.kind(), "malformed_response");

        let api = CapabilityError::from(LlmError::ApiError {
            code: 503,
            message: "unavailable".to_string(),
        });
        assert_eq!(api.kind(), "transport");
        assert!(api.to_string().contains("503"));
    }

    #[test]
    fn test_transition_error_display() {
        let err = TransitionError::InvalidTransition {
            task_id: TaskId::from_string("TASK-1"),
            from: TaskState::Created,
            to: TaskState::Testing,
        };
        let message = err.to_string();
        assert!(message.contains("CREATED"));
        assert!(message.contains("TESTING"));
    }
}
