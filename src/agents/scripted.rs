//! Deterministic stage worker with scripted replies.
//!
//! Used for dry runs and tests: each worker pops its next produce result and
//! its next verdict from a queue, falling back to a canned output and a
//! passing verdict once the queue is empty.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::worker::StageWorker;
use crate::error::CapabilityError;
use crate::feedback::ValidationVerdict;
use crate::task::{Stage, StageOutput, Task, TaskId};

/// Kind of capability call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Produce,
    Validate,
}

/// Whether a log entry marks the start or the end of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub task_id: TaskId,
    pub worker: Stage,
    pub kind: CallKind,
    pub phase: CallPhase,
}

/// Ordered log of call starts and ends, shared between workers.
#[derive(Debug, Default)]
pub struct CallLog {
    events: Mutex<Vec<CallEvent>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: CallEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<CallEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Largest number of calls in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        let mut current = 0usize;
        let mut max = 0usize;
        for event in self.events() {
            match event.phase {
                CallPhase::Start => {
                    current += 1;
                    max = max.max(current);
                }
                CallPhase::End => current = current.saturating_sub(1),
            }
        }
        max
    }
}

/// Worker that replays scripted results.
#[derive(Debug)]
pub struct ScriptedWorker {
    stage: Stage,
    outputs: Mutex<VecDeque<Result<String, CapabilityError>>>,
    verdicts: Mutex<VecDeque<Result<ValidationVerdict, CapabilityError>>>,
    delay: Duration,
    log: Option<Arc<CallLog>>,
    produce_calls: AtomicU32,
    validate_calls: AtomicU32,
}

impl ScriptedWorker {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            outputs: Mutex::new(VecDeque::new()),
            verdicts: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            log: None,
            produce_calls: AtomicU32::new(0),
            validate_calls: AtomicU32::new(0),
        }
    }

    /// Queue produce results, consumed in order.
    pub fn with_outputs(self, outputs: Vec<Result<String, CapabilityError>>) -> Self {
        self.lock_outputs().extend(outputs);
        self
    }

    /// Queue verdicts, consumed in order.
    pub fn with_verdicts(self, verdicts: Vec<Result<ValidationVerdict, CapabilityError>>) -> Self {
        self.lock_verdicts().extend(verdicts);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_log(mut self, log: Arc<CallLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn produce_calls(&self) -> u32 {
        self.produce_calls.load(Ordering::SeqCst)
    }

    pub fn validate_calls(&self) -> u32 {
        self.validate_calls.load(Ordering::SeqCst)
    }

    /// A passing worker for every stage.
    pub fn all() -> Vec<Arc<dyn StageWorker>> {
        Stage::ALL
            .iter()
            .map(|stage| Arc::new(ScriptedWorker::new(*stage)) as Arc<dyn StageWorker>)
            .collect()
    }

    fn lock_outputs(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, CapabilityError>>> {
        self.outputs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_verdicts(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<ValidationVerdict, CapabilityError>>> {
        self.verdicts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, task_id: &TaskId, kind: CallKind, phase: CallPhase) {
        if let Some(log) = &self.log {
            log.push(CallEvent {
                task_id: task_id.clone(),
                worker: self.stage,
                kind,
                phase,
            });
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl StageWorker for ScriptedWorker {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn produce(
        &self,
        task: &Task,
        feedback: Option<&str>,
    ) -> Result<StageOutput, CapabilityError> {
        self.produce_calls.fetch_add(1, Ordering::SeqCst);
        self.log(&task.id, CallKind::Produce, CallPhase::Start);
        self.pause().await;
        let next = self.lock_outputs().pop_front();
        self.log(&task.id, CallKind::Produce, CallPhase::End);

        let content = match next {
            Some(result) => result?,
            None => match feedback {
                Some(feedback) => format!(
                    "{} for {} (revised: {})",
                    self.stage, task.description, feedback
                ),
                None => format!("{} for {}", self.stage, task.description),
            },
        };
        Ok(StageOutput::new(self.stage, content))
    }

    async fn validate(
        &self,
        _upstream: &StageOutput,
        task: &Task,
    ) -> Result<ValidationVerdict, CapabilityError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        self.log(&task.id, CallKind::Validate, CallPhase::Start);
        self.pause().await;
        let next = self.lock_verdicts().pop_front();
        self.log(&task.id, CallKind::Validate, CallPhase::End);

        next.unwrap_or_else(|| Ok(ValidationVerdict::pass(1.0)))
    }
}
