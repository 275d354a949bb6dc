//! Stage workers.
//!
//! - **worker**: the `StageWorker` trait and the per-stage worker set
//! - **llm_worker**: a worker that produces and reviews through an LLM
//! - **prompts**: system and user prompts for each stage
//! - **quality**: structured fields of quality assessment reports
//! - **scripted**: deterministic workers for dry runs and tests

pub mod llm_worker;
pub mod prompts;
pub mod quality;
pub mod scripted;
pub mod worker;

pub use llm_worker::LlmStageWorker;
pub use quality::{QualityReport, Recommendation};
pub use scripted::{CallEvent, CallKind, CallLog, CallPhase, ScriptedWorker};
pub use worker::{StageWorker, StageWorkers};
