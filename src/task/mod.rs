//! Tasks and their lifecycle.
//!
//! A [`Task`] moves through a strictly forward chain of [`TaskState`]s, one
//! [`Stage`] at a time. All state writes go through the [`StateMachine`],
//! which rejects any move off the graph.
//!
//! # Example
//!
//! ```rust,ignore
//! use devflow::task::{StateMachine, Task, TaskState};
//!
//! let machine = StateMachine::new();
//! let mut task = Task::new("Add pagination to the users endpoint").with_priority(70);
//! machine.transition(&mut task, TaskState::Decomposing, "orchestrator", None)?;
//! ```

pub mod model;
pub mod stage;
pub mod state;
pub mod store;

pub use model::{
    FailureReason, HistoryEntry, StageOutput, Task, TaskId, DEFAULT_LANGUAGE, DEFAULT_PRIORITY,
    MAX_PRIORITY,
};
pub use stage::Stage;
pub use state::{StateMachine, TaskState};
pub use store::TaskStore;
