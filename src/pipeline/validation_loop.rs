//! The peer-review gate around a single stage.
//!
//! A stage's output is produced (or served from the decomposition cache),
//! then reviewed by the worker that will build on it. A rejection feeds the
//! reviewer's text back into the producer, up to `max_retries` times.
//!
//! The loop never moves a task between lifecycle states. It reports a
//! [`StageOutcome`] and the orchestrator applies the matching transition.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backoff::{call_with_backoff, CancelSignal, InvokeError, RetryPolicy};
use super::events::{FeedbackNotice, Notifier};
use crate::agents::StageWorker;
use crate::cache::DecompositionCache;
use crate::error::CapabilityError;
use crate::feedback::{FeedbackRecord, FeedbackTracker, ValidationVerdict};
use crate::metrics::MetricsCollector;
use crate::task::{Stage, StageOutput, Task};

/// Result of running one stage through the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// The reviewer approved the output.
    Advanced,
    /// Every attempt was rejected.
    ExceededRetries { attempts: u32 },
    /// A capability call stayed unavailable after backoff.
    CapabilityFailed { error: CapabilityError, attempts: u32 },
    /// Cancellation was observed.
    Cancelled,
}

/// Runs the produce/validate/retry protocol for one stage of one task.
#[derive(Debug, Clone)]
pub struct ValidationLoop {
    cache: Arc<DecompositionCache>,
    feedback: Arc<FeedbackTracker>,
    notifier: Notifier,
    metrics: MetricsCollector,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ValidationLoop {
    pub fn new(cache: Arc<DecompositionCache>, feedback: Arc<FeedbackTracker>) -> Self {
        Self {
            cache,
            feedback,
            notifier: Notifier::default(),
            metrics: MetricsCollector::new(),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Produce `stage`'s output for `task` and get it approved by `validator`.
    ///
    /// The validator is called at most `max_retries + 1` times. An output
    /// already present in the task's metadata is reviewed before anything is
    /// regenerated. On approval `retry_count` is cleared and the output is
    /// marked approved.
    pub async fn run_stage(
        &self,
        task: &mut Task,
        stage: Stage,
        producer: &dyn StageWorker,
        validator: &dyn StageWorker,
        max_retries: u32,
        cancel: &CancelSignal,
    ) -> StageOutcome {
        let mut pending = task.stage_output(stage).cloned();
        let mut feedback: Option<String> = None;

        loop {
            let output = match pending.take() {
                Some(output) => output,
                None => match self
                    .obtain_output(task, stage, producer, feedback.as_deref(), cancel)
                    .await
                {
                    Ok(output) => {
                        task.put_stage_output(output.clone());
                        output
                    }
                    Err(outcome) => return outcome,
                },
            };

            let retry_index = task.retry_count;
            let verdict = {
                let snapshot: &Task = task;
                let result = call_with_backoff(&self.retry, self.call_timeout, cancel, || {
                    validator.validate(&output, snapshot)
                })
                .await;
                match result {
                    Ok(verdict) => verdict,
                    Err(err) => return self.invoke_failure(task, stage, err),
                }
            };

            self.archive(task, validator.stage(), stage, &verdict, retry_index);

            if verdict.passed() {
                task.retry_count = 0;
                task.mark_approved(stage);
                if stage == Stage::Decomposition && !output.from_cache {
                    if let Some(approved) = task.stage_output(stage).cloned() {
                        self.cache.put(&task.description, approved);
                    }
                }
                info!(
                    task_id = %task.id,
                    stage = %stage,
                    attempt = retry_index,
                    "Stage output approved"
                );
                return StageOutcome::Advanced;
            }

            let reason = verdict
                .feedback()
                .unwrap_or("Output rejected without explanation")
                .to_string();
            task.record(
                validator.stage().as_str(),
                format!(
                    "Validation of {} failed (attempt {}/{}): {}",
                    stage,
                    retry_index + 1,
                    max_retries + 1,
                    reason
                ),
            );

            if task.retry_count >= max_retries {
                warn!(
                    task_id = %task.id,
                    stage = %stage,
                    attempts = retry_index + 1,
                    "Validation retries exhausted"
                );
                return StageOutcome::ExceededRetries {
                    attempts: retry_index + 1,
                };
            }

            task.retry_count += 1;
            debug!(
                task_id = %task.id,
                stage = %stage,
                attempt = task.retry_count,
                "Regenerating with feedback"
            );
            feedback = Some(reason);
        }
    }

    /// Serve from the cache when allowed, otherwise call the producer.
    async fn obtain_output(
        &self,
        task: &Task,
        stage: Stage,
        producer: &dyn StageWorker,
        feedback: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<StageOutput, StageOutcome> {
        // A retry carries feedback the cached plan has not seen.
        if stage == Stage::Decomposition && feedback.is_none() {
            let cached = self.cache.get(&task.description);
            self.metrics.record_cache_lookup(cached.is_some());
            if let Some(mut output) = cached {
                debug!(task_id = %task.id, "Decomposition served from cache");
                output.from_cache = true;
                output.approved = false;
                output.attempt = task.retry_count;
                return Ok(output);
            }
        }

        let result = call_with_backoff(&self.retry, self.call_timeout, cancel, || {
            producer.produce(task, feedback)
        })
        .await;

        match result {
            Ok(mut output) => {
                output.stage = stage;
                output.attempt = task.retry_count;
                output.from_cache = false;
                output.approved = false;
                Ok(output)
            }
            Err(err) => Err(self.invoke_failure(task, stage, err)),
        }
    }

    fn invoke_failure(&self, task: &Task, stage: Stage, err: InvokeError) -> StageOutcome {
        match err {
            InvokeError::Cancelled => StageOutcome::Cancelled,
            InvokeError::Exhausted { attempts, last } => {
                warn!(
                    task_id = %task.id,
                    stage = %stage,
                    attempts,
                    kind = last.kind(),
                    error = %last,
                    "Capability unavailable"
                );
                self.metrics.record_capability_error(stage, last.kind());
                StageOutcome::CapabilityFailed {
                    error: last,
                    attempts,
                }
            }
        }
    }

    /// Archive a verdict and resolve the previous rejection at this boundary.
    fn archive(
        &self,
        task: &Task,
        source: Stage,
        target: Stage,
        verdict: &ValidationVerdict,
        retry_index: u32,
    ) {
        if retry_index > 0 {
            self.feedback
                .mark_retry_outcome(&task.id, source, target, verdict.passed());
        }
        self.feedback.record(FeedbackRecord::new(
            task.id.clone(),
            source,
            target,
            verdict.clone(),
            retry_index,
        ));
        self.metrics.record_validation(target, verdict.passed());
        self.notifier.feedback(&FeedbackNotice {
            task_id: task.id.clone(),
            source_stage: source,
            target_stage: target,
            verdict: verdict.clone(),
            retry_index,
        });
    }
}
