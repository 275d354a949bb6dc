//! Priority scheduling over the ready set.
//!
//! - **priority**: effective priority from base priority, age, blocking
//!   relationships and failure history
//! - **selection**: pick the next ready task, with deterministic tie-breaking
//!
//! # Example
//!
//! ```rust,ignore
//! use devflow::scheduler::{select_next, PriorityWeights};
//!
//! if let Some(index) = select_next(&ready, chrono::Utc::now(), &PriorityWeights::default()) {
//!     let task = ready.swap_remove(index);
//!     // dispatch task
//! }
//! ```

pub mod priority;
pub mod selection;

pub use priority::{effective_priority, effective_priority_with, PriorityWeights};
pub use selection::{rank, select_next, RankedTask};
