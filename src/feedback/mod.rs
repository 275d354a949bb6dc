//! Validation verdicts and the feedback they leave behind.
//!
//! - **verdict**: the pass/fail judgment a downstream worker returns
//! - **tracker**: append-only archive of verdicts with per-stage statistics
//! - **parser**: converts rejection feedback into prompt directives for retries

pub mod parser;
pub mod tracker;
pub mod verdict;

pub use parser::{FeedbackParser, ImprovementCategory, PromptImprovement};
pub use tracker::{FeedbackRecord, FeedbackStats, FeedbackTracker, TaskFeedbackSummary};
pub use verdict::ValidationVerdict;
