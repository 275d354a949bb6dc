//! Workflow orchestration.
//!
//! # Architecture
//!
//! - **Orchestrator**: owns the ready set and the concurrency slots, picks
//!   the next task by effective priority and applies state transitions
//! - **ValidationLoop**: produces a stage's output and gets it approved by
//!   the next stage's worker, retrying with the reviewer's feedback
//! - **Backoff**: exponential retry of capability calls with per-task
//!   cancellation
//! - **Events**: best-effort state change and feedback notifications
//! - **Config**: configuration for all of the above
//!
//! # Flow per scheduling opportunity
//!
//! 1. Score every ready task and dispatch the best one into a free slot
//! 2. Move it into the stage's active state
//! 3. Produce the output (or serve the decomposition from cache)
//! 4. Have the next stage's worker validate it, regenerating on rejection
//! 5. Move the task to the next ready state, or to `FAILED`
//! 6. Return the task to the ready set
//!
//! # Example
//!
//! ```rust,ignore
//! use devflow::agents::{LlmStageWorker, StageWorkers};
//! use devflow::pipeline::{Orchestrator, WorkflowConfig};
//!
//! let config = WorkflowConfig::from_env()?;
//! let workers = StageWorkers::new(LlmStageWorker::all(llm, "", 0.3, 4096))?;
//! let orchestrator = Orchestrator::new(config, workers)?;
//!
//! let done = orchestrator.run(vec![Task::new("Add a /health endpoint")], 4).await?;
//! for task in &done {
//!     println!("{}: {}", task.id, task.state());
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod events;
pub mod orchestrator;
pub mod validation_loop;

pub use backoff::{call_with_backoff, BackoffState, CancelSignal, InvokeError, RetryPolicy};
pub use config::{ConfigError, WorkflowConfig};
pub use events::{
    channel_sink, ChannelSink, FeedbackNotice, NotificationSink, Notifier, StateChange,
    TracingSink, WorkflowEvent,
};
pub use orchestrator::{failure_breakdown, Orchestrator, RunCounters, WorkflowStats};
pub use validation_loop::{StageOutcome, ValidationLoop};
