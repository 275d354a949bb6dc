//! devflow: multi-stage development workflow orchestration.
//!
//! Tasks move through decomposition, implementation, testing, quality
//! assessment and integration. Each stage's output must be approved by the
//! next stage's worker before the task advances; rejected output is
//! regenerated with the reviewer's feedback, up to a retry limit.

pub mod agents;
pub mod cache;
pub mod cli;
pub mod error;
pub mod feedback;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod task;
pub mod utils;

// Re-export commonly used types
pub use error::{CapabilityError, DevflowError, LlmError, Result, StoreError, TransitionError};
pub use pipeline::{Orchestrator, WorkflowConfig};
pub use task::{Stage, Task, TaskId, TaskState};
