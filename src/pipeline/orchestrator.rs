//! Top-level workflow driver.
//!
//! The orchestrator owns the ready set and the concurrency slots. At every
//! scheduling opportunity it scores the ready tasks afresh, dispatches the
//! best one into a free slot, runs exactly one stage for it through the
//! validation loop, and puts it back into the ready set. Only the
//! orchestrator writes task states.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::backoff::CancelSignal;
use super::config::{ConfigError, WorkflowConfig};
use super::events::{Notifier, StateChange};
use super::validation_loop::{StageOutcome, ValidationLoop};
use crate::agents::StageWorkers;
use crate::cache::{CacheStats, DecompositionCache};
use crate::error::{DevflowError, Result};
use crate::feedback::{FeedbackStats, FeedbackTracker};
use crate::metrics::MetricsCollector;
use crate::scheduler::select_next;
use crate::task::{FailureReason, Stage, StateMachine, Task, TaskId, TaskState, TaskStore};

/// Actor name recorded in task history for orchestrator transitions.
const ACTOR: &str = "orchestrator";

/// Counters over every stage run by one orchestrator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunCounters {
    pub stages_run: u64,
    pub stages_advanced: u64,
    pub validation_exhausted: u64,
    pub capability_failures: u64,
    pub stage_timeouts: u64,
    pub cancellations: u64,
    pub completed: u64,
    /// Mean wall-clock time per stage run.
    #[serde(with = "duration_secs")]
    pub average_stage_duration: Duration,
}

impl RunCounters {
    fn record_stage(&mut self, duration: Duration) {
        self.stages_run += 1;
        if self.stages_run == 1 {
            self.average_stage_duration = duration;
        } else {
            // Incremental average: avg = avg + (new - avg) / n
            let n = self.stages_run as f64;
            let old_avg = self.average_stage_duration.as_secs_f64();
            let new_avg = old_avg + (duration.as_secs_f64() - old_avg) / n;
            self.average_stage_duration = Duration::from_secs_f64(new_avg.max(0.0));
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}

/// Snapshot of orchestrator statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStats {
    pub counters: RunCounters,
    pub cache: CacheStats,
    /// Feedback received by each stage's outputs.
    pub feedback: Vec<FeedbackStats>,
}

/// Drives tasks through the stage pipeline.
pub struct Orchestrator {
    config: WorkflowConfig,
    workers: StageWorkers,
    state_machine: StateMachine,
    validation: ValidationLoop,
    cache: Arc<DecompositionCache>,
    feedback: Arc<FeedbackTracker>,
    notifier: Notifier,
    metrics: MetricsCollector,
    cancellations: RwLock<HashMap<TaskId, Arc<CancelSignal>>>,
    counters: RwLock<RunCounters>,
}

impl Orchestrator {
    /// Create an orchestrator with fresh cache and feedback tracker.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if `config` is invalid.
    pub fn new(
        config: WorkflowConfig,
        workers: StageWorkers,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let cache = Arc::new(DecompositionCache::new());
        let feedback = Arc::new(FeedbackTracker::new());
        let notifier = Notifier::default();
        let validation = build_loop(&config, &cache, &feedback, &notifier);

        Ok(Self {
            config,
            workers,
            state_machine: StateMachine::new(),
            validation,
            cache,
            feedback,
            notifier,
            metrics: MetricsCollector::new(),
            cancellations: RwLock::new(HashMap::new()),
            counters: RwLock::new(RunCounters::default()),
        })
    }

    /// Share a decomposition cache with other orchestrators.
    pub fn with_cache(mut self, cache: Arc<DecompositionCache>) -> Self {
        self.cache = cache;
        self.rebuild_loop()
    }

    /// Share a feedback tracker with other orchestrators.
    pub fn with_feedback_tracker(mut self, feedback: Arc<FeedbackTracker>) -> Self {
        self.feedback = feedback;
        self.rebuild_loop()
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self.rebuild_loop()
    }

    fn rebuild_loop(mut self) -> Self {
        self.validation = build_loop(&self.config, &self.cache, &self.feedback, &self.notifier);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<DecompositionCache> {
        &self.cache
    }

    pub fn feedback_tracker(&self) -> &Arc<FeedbackTracker> {
        &self.feedback
    }

    /// Mark a task for cancellation.
    ///
    /// Takes effect before the task's next stage starts, or at the next
    /// point the running stage observes it. A task not yet submitted is
    /// cancelled as soon as it is.
    pub fn cancel(&self, task_id: &TaskId) {
        info!(task_id = %task_id, "Cancellation requested");
        self.signal_for(task_id).cancel();
    }

    pub fn is_cancelled(&self, task_id: &TaskId) -> bool {
        self.cancellations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .is_some_and(|signal| signal.is_cancelled())
    }

    fn signal_for(&self, task_id: &TaskId) -> Arc<CancelSignal> {
        let mut signals = self
            .cancellations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(signals.entry(task_id.clone()).or_default())
    }

    /// Forget a task's cancel signal. Called once the task is terminal or
    /// reset, so a later run starts with a fresh signal.
    fn clear_signal(&self, task_id: &TaskId) {
        self.cancellations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
    }

    /// Reset a failed task in `store` to its checkpoint.
    ///
    /// Clears any pending cancellation for the task and publishes the
    /// `FAILED -> checkpoint` change to metrics and sinks.
    ///
    /// # Errors
    ///
    /// `DevflowError::Store` if the task is unknown or not `FAILED`.
    pub async fn reset(
        &self,
        store: &TaskStore,
        task_id: &TaskId,
        operator: &str,
    ) -> Result<StateChange> {
        let change = store.reset(task_id, &self.state_machine, operator).await?;
        self.clear_signal(task_id);
        self.publish(&change);
        Ok(change)
    }

    /// Run every task to a terminal state.
    ///
    /// At most `max_concurrency` stages run at once. Tasks are returned in
    /// input order. Terminal tasks are passed through untouched.
    ///
    /// # Errors
    ///
    /// - `DevflowError::Config` if `max_concurrency` is zero
    /// - `DevflowError::InvalidInput` for duplicate ids or a task caught
    ///   mid-stage
    /// - `DevflowError::Transition` if a transition is rejected by the state
    ///   machine; the run stops immediately
    pub async fn run(&self, tasks: Vec<Task>, max_concurrency: usize) -> Result<Vec<Task>> {
        if max_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be greater than 0".to_string(),
            )
            .into());
        }

        let order: Vec<TaskId> = tasks.iter().map(|task| task.id.clone()).collect();
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id.clone()) {
                return Err(DevflowError::InvalidInput(format!(
                    "task {} submitted twice",
                    task.id
                )));
            }
            if task.state().is_active() {
                return Err(DevflowError::InvalidInput(format!(
                    "task {} is mid-stage ({}); fail or reset it before scheduling",
                    task.id,
                    task.state()
                )));
            }
        }

        let (mut finished, mut waiting): (Vec<Task>, Vec<Task>) =
            tasks.into_iter().partition(|task| task.state().is_terminal());

        info!(
            tasks = waiting.len(),
            max_concurrency,
            "Starting workflow run"
        );

        let slots = Arc::new(Semaphore::new(max_concurrency));
        let mut in_flight = FuturesUnordered::new();

        loop {
            while !waiting.is_empty() {
                let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
                    break;
                };
                let Some(index) = select_next(&waiting, Utc::now(), &self.config.priority) else {
                    break;
                };
                let task = waiting.swap_remove(index);
                debug!(task_id = %task.id, state = %task.state(), "Dispatching task");
                in_flight.push(self.dispatch(task, permit));
            }
            self.metrics.set_ready_queue_depth(waiting.len());

            match in_flight.next().await {
                Some(result) => {
                    let task = result?;
                    if task.state().is_terminal() {
                        finished.push(task);
                    } else {
                        waiting.push(task);
                    }
                }
                None => break,
            }
        }

        if !waiting.is_empty() {
            warn!(remaining = waiting.len(), "Tasks left without a runnable state");
        }

        let mut by_id: HashMap<TaskId, Task> = finished
            .into_iter()
            .chain(waiting)
            .map(|task| (task.id.clone(), task))
            .collect();
        Ok(order
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    /// Run every runnable task in `store` and write the results back.
    ///
    /// Returns how many tasks were run.
    pub async fn run_store(&self, store: &TaskStore) -> Result<usize> {
        let runnable = store.runnable().await;
        let count = runnable.len();
        let results = self.run(runnable, self.config.max_concurrency).await?;
        store.upsert_all(results).await;
        Ok(count)
    }

    async fn dispatch(&self, task: Task, permit: OwnedSemaphorePermit) -> Result<Task> {
        let _permit = permit;
        self.advance(task).await
    }

    /// Run the task's next stage and apply the resulting transition.
    async fn advance(&self, mut task: Task) -> Result<Task> {
        let cancel = self.signal_for(&task.id);
        if cancel.is_cancelled() {
            self.fail(&mut task, FailureReason::Cancelled)?;
            self.clear_signal(&task.id);
            self.counters_mut().cancellations += 1;
            return Ok(task);
        }

        let Some(stage) = task.state().pending_stage() else {
            self.clear_signal(&task.id);
            return Ok(task);
        };

        self.transition(&mut task, stage.active_state())?;
        self.metrics.record_stage_started();
        let started = Instant::now();

        let producer = self.workers.producer(stage);
        let validator = self.workers.validator_for(stage);
        let max_retries = self.config.max_retries_for(stage);

        let outcome = tokio::time::timeout(
            self.config.stage_timeout,
            self.validation.run_stage(
                &mut task,
                stage,
                producer.as_ref(),
                validator.as_ref(),
                max_retries,
                &cancel,
            ),
        )
        .await;

        let elapsed = started.elapsed();
        self.metrics.record_stage_finished(stage, elapsed.as_secs_f64());
        self.counters_mut().record_stage(elapsed);

        match outcome {
            Ok(StageOutcome::Advanced) => {
                self.transition(&mut task, stage.approved_state())?;
                let mut counters = self.counters_mut();
                counters.stages_advanced += 1;
                if task.state() == TaskState::Completed {
                    counters.completed += 1;
                }
            }
            Ok(StageOutcome::ExceededRetries { .. }) => {
                self.fail(&mut task, FailureReason::ValidationExceededRetries { stage })?;
                self.counters_mut().validation_exhausted += 1;
            }
            Ok(StageOutcome::CapabilityFailed { error, attempts }) => {
                let detail = format!("{} after {} attempts", error, attempts);
                self.fail(&mut task, FailureReason::CapabilityError { stage, detail })?;
                self.counters_mut().capability_failures += 1;
            }
            Ok(StageOutcome::Cancelled) => {
                self.fail(&mut task, FailureReason::Cancelled)?;
                self.counters_mut().cancellations += 1;
            }
            Err(_) => {
                let seconds = self.config.stage_timeout.as_secs();
                warn!(
                    task_id = %task.id,
                    stage = %stage,
                    seconds,
                    "Stage exceeded its time budget"
                );
                self.fail(&mut task, FailureReason::StageTimeout { stage, seconds })?;
                self.counters_mut().stage_timeouts += 1;
            }
        }

        if task.state().is_terminal() {
            self.clear_signal(&task.id);
        }
        Ok(task)
    }

    fn transition(&self, task: &mut Task, to: TaskState) -> Result<()> {
        let change = self.state_machine.transition(task, to, ACTOR, None)?;
        self.publish(&change);
        Ok(())
    }

    fn fail(&self, task: &mut Task, reason: FailureReason) -> Result<()> {
        let change = self.state_machine.fail(task, reason, ACTOR)?;
        self.publish(&change);
        Ok(())
    }

    fn publish(&self, change: &StateChange) {
        self.metrics.record_transition(change);
        self.notifier.state_change(change);
    }

    fn counters_mut(&self) -> std::sync::RwLockWriteGuard<'_, RunCounters> {
        self.counters.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current statistics across every run of this orchestrator.
    pub fn stats(&self) -> WorkflowStats {
        let counters = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        WorkflowStats {
            counters,
            cache: self.cache.stats(),
            feedback: Stage::ALL
                .iter()
                .map(|stage| self.feedback.stats_for(*stage))
                .collect(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("workers", &self.workers)
            .field("notifier", &self.notifier)
            .finish()
    }
}

fn build_loop(
    config: &WorkflowConfig,
    cache: &Arc<DecompositionCache>,
    feedback: &Arc<FeedbackTracker>,
    notifier: &Notifier,
) -> ValidationLoop {
    ValidationLoop::new(Arc::clone(cache), Arc::clone(feedback))
        .with_notifier(notifier.clone())
        .with_retry_policy(config.retry)
        .with_call_timeout(config.call_timeout)
}

/// Count of tasks per failure code, for reports.
pub fn failure_breakdown(tasks: &[Task]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for reason in tasks.iter().filter_map(|task| task.failure_reason()) {
        *counts.entry(reason.code()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{CallKind, CallLog, CallPhase, ScriptedWorker, StageWorker};
    use crate::error::CapabilityError;
    use crate::feedback::ValidationVerdict;
    use crate::pipeline::backoff::RetryPolicy;
    use crate::pipeline::events::{channel_sink, WorkflowEvent};

    fn fast_config() -> WorkflowConfig {
        WorkflowConfig::new()
            .with_retry_policy(RetryPolicy {
                initial_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(2),
                max_attempts: 2,
            })
            .with_call_timeout(Duration::from_secs(5))
            .with_stage_timeout(Duration::from_secs(10))
    }

    fn orchestrator(workers: Vec<Arc<dyn StageWorker>>) -> Orchestrator {
        Orchestrator::new(fast_config(), StageWorkers::new(workers).unwrap()).unwrap()
    }

    /// Default workers with one stage replaced.
    fn workers_with(replacement: Arc<dyn StageWorker>) -> Vec<Arc<dyn StageWorker>> {
        ScriptedWorker::all()
            .into_iter()
            .map(|worker| {
                if worker.stage() == replacement.stage() {
                    Arc::clone(&replacement)
                } else {
                    worker
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_task_runs_to_completion() {
        let (sink, mut rx) = channel_sink(64);
        let orch = orchestrator(ScriptedWorker::all())
            .with_notifier(Notifier::new().with_sink(Arc::new(sink)));
        let task = Task::new("Implement a token bucket");

        let done = orch.run(vec![task], 2).await.unwrap();

        assert_eq!(done.len(), 1);
        let task = &done[0];
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.metadata().len(), 5);
        assert!(task.metadata().values().all(|output| output.approved));

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::StateChange(change) = event {
                states.push(change.to);
            }
        }
        assert_eq!(states, TaskState::SEQUENCE[1..].to_vec());

        let stats = orch.stats();
        assert_eq!(stats.counters.stages_run, 5);
        assert_eq!(stats.counters.completed, 1);
    }

    #[tokio::test]
    async fn test_validation_exhaustion_fails_task() {
        let validator = Arc::new(ScriptedWorker::new(Stage::Implementation).with_verdicts(vec![
            Ok(ValidationVerdict::fail("no plan", 0.9, vec![])),
            Ok(ValidationVerdict::fail("no plan", 0.9, vec![])),
            Ok(ValidationVerdict::fail("no plan", 0.9, vec![])),
        ]));
        let orch = orchestrator(workers_with(validator.clone()));

        let done = orch.run(vec![Task::new("x")], 1).await.unwrap();

        let task = &done[0];
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(task.failure_reason().map(|r| r.code()), Some("validation_exceeded_retries"));
        assert_eq!(validator.validate_calls(), 3);
        assert_eq!(validator.produce_calls(), 0);
        assert!(task
            .history()
            .last()
            .is_some_and(|entry| entry.message.contains("validation_exceeded_retries")));
    }

    #[tokio::test]
    async fn test_capability_failure_fails_task() {
        let tester = Arc::new(ScriptedWorker::new(Stage::Testing).with_outputs(vec![
            Err(CapabilityError::RateLimited("429".into())),
            Err(CapabilityError::RateLimited("429".into())),
        ]));
        let orch = orchestrator(workers_with(tester));

        let done = orch.run(vec![Task::new("x")], 1).await.unwrap();

        let task = &done[0];
        assert_eq!(task.state(), TaskState::Failed);
        assert!(matches!(
            task.failure_reason(),
            Some(FailureReason::CapabilityError { stage: Stage::Testing, .. })
        ));
        assert_eq!(task.checkpoint(), TaskState::ReadyForTesting);
        assert_eq!(failure_breakdown(&done).get("capability_error"), Some(&1));
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_task() {
        let slow = Arc::new(
            ScriptedWorker::new(Stage::Decomposition).with_delay(Duration::from_millis(200)),
        );
        let config = fast_config()
            .with_call_timeout(Duration::from_millis(50))
            .with_stage_timeout(Duration::from_millis(60));
        let orch =
            Orchestrator::new(config, StageWorkers::new(workers_with(slow)).unwrap()).unwrap();

        let done = orch.run(vec![Task::new("x")], 1).await.unwrap();

        assert_eq!(done[0].state(), TaskState::Failed);
        assert_eq!(done[0].failure_reason().map(|r| r.code()), Some("capability_error"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let orch = orchestrator(ScriptedWorker::all());
        let task = Task::new("x");
        orch.cancel(&task.id);

        let done = orch.run(vec![task], 1).await.unwrap();

        assert_eq!(done[0].state(), TaskState::Failed);
        assert_eq!(done[0].failure_reason(), Some(&FailureReason::Cancelled));
        assert!(done[0].metadata().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_stage_discards_result() {
        let slow = Arc::new(
            ScriptedWorker::new(Stage::Implementation).with_delay(Duration::from_millis(100)),
        );
        let orch = Arc::new(orchestrator(workers_with(slow.clone())));
        let task = Task::new("x");
        let id = task.id.clone();

        let runner = Arc::clone(&orch);
        let handle = tokio::spawn(async move { runner.run(vec![task], 1).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        orch.cancel(&id);

        let done = handle.await.unwrap().unwrap();
        assert_eq!(done[0].state(), TaskState::Failed);
        assert_eq!(done[0].failure_reason(), Some(&FailureReason::Cancelled));
        assert!(done[0].stage_output(Stage::Implementation).is_none());
    }

    #[tokio::test]
    async fn test_single_slot_serializes_stage_calls() {
        let log = Arc::new(CallLog::new());
        let workers: Vec<Arc<dyn StageWorker>> = Stage::ALL
            .iter()
            .map(|stage| {
                Arc::new(
                    ScriptedWorker::new(*stage)
                        .with_delay(Duration::from_millis(5))
                        .with_log(Arc::clone(&log)),
                ) as Arc<dyn StageWorker>
            })
            .collect();
        let orch = orchestrator(workers);
        let first = Task::new("first").with_priority(90);
        let second = Task::new("second").with_priority(10);
        let first_id = first.id.clone();

        let done = orch.run(vec![second, first], 1).await.unwrap();

        assert!(done.iter().all(|task| task.state() == TaskState::Completed));
        assert_eq!(done[0].description, "second");
        assert_eq!(log.max_in_flight(), 1);

        let events = log.events();
        let first_start = &events[0];
        assert_eq!(first_start.task_id, first_id);
        assert_eq!(first_start.kind, CallKind::Produce);
        assert_eq!(first_start.phase, CallPhase::Start);
    }

    #[tokio::test]
    async fn test_parallel_slots_overlap() {
        let log = Arc::new(CallLog::new());
        let workers: Vec<Arc<dyn StageWorker>> = Stage::ALL
            .iter()
            .map(|stage| {
                Arc::new(
                    ScriptedWorker::new(*stage)
                        .with_delay(Duration::from_millis(10))
                        .with_log(Arc::clone(&log)),
                ) as Arc<dyn StageWorker>
            })
            .collect();
        let orch = orchestrator(workers);
        let tasks = vec![Task::new("a"), Task::new("b"), Task::new("c")];

        let done = orch.run(tasks, 2).await.unwrap();

        assert!(done.iter().all(|task| task.state() == TaskState::Completed));
        assert_eq!(log.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let orch = orchestrator(ScriptedWorker::all());
        let task = Task::new("x");
        let twin = task.clone();

        assert!(matches!(
            orch.run(vec![task, twin], 1).await,
            Err(DevflowError::InvalidInput(_))
        ));
        assert!(matches!(
            orch.run(vec![Task::new("y")], 0).await,
            Err(DevflowError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_run_store_writes_back() {
        let orch = orchestrator(ScriptedWorker::all());
        let store = TaskStore::new();
        let id = store.insert(Task::new("x")).await.unwrap();

        assert_eq!(orch.run_store(&store).await.unwrap(), 1);
        assert_eq!(store.get(&id).await.unwrap().state(), TaskState::Completed);
        assert_eq!(orch.run_store(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_task_resumes_from_checkpoint() {
        let flaky = Arc::new(ScriptedWorker::new(Stage::QualityAssessment).with_outputs(vec![
            Err(CapabilityError::Transport("down".into())),
            Err(CapabilityError::Transport("down".into())),
        ]));
        let orch = orchestrator(workers_with(flaky.clone()));
        let store = TaskStore::new();
        let id = store.insert(Task::new("x")).await.unwrap();

        orch.run_store(&store).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().state(), TaskState::Failed);

        orch.reset(&store, &id, "operator").await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().state(), TaskState::ReadyForQuality);

        orch.run_store(&store).await.unwrap();
        let task = store.get(&id).await.unwrap();
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(flaky.produce_calls(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_task_runs_again_after_reset() {
        let decomposer = Arc::new(ScriptedWorker::new(Stage::Decomposition));
        let orch = orchestrator(workers_with(decomposer.clone()));
        let store = TaskStore::new();
        let id = store.insert(Task::new("x")).await.unwrap();

        orch.cancel(&id);
        orch.run_store(&store).await.unwrap();
        let task = store.get(&id).await.unwrap();
        assert_eq!(task.failure_reason(), Some(&FailureReason::Cancelled));
        assert!(!orch.is_cancelled(&id));

        orch.reset(&store, &id, "operator").await.unwrap();
        orch.run_store(&store).await.unwrap();

        let task = store.get(&id).await.unwrap();
        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.failure_reason().is_none());
        assert_eq!(decomposer.produce_calls(), 1);
        assert_eq!(orch.stats().counters.cancellations, 1);
    }

    #[tokio::test]
    async fn test_reset_publishes_state_change() {
        let (sink, mut rx) = channel_sink(64);
        let orch = orchestrator(ScriptedWorker::all())
            .with_notifier(Notifier::new().with_sink(Arc::new(sink)));
        let store = TaskStore::new();
        let id = store.insert(Task::new("x")).await.unwrap();

        orch.cancel(&id);
        orch.run_store(&store).await.unwrap();
        while rx.try_recv().is_ok() {}

        let change = orch.reset(&store, &id, "operator").await.unwrap();
        assert_eq!(change.from, TaskState::Failed);
        assert_eq!(change.to, TaskState::Created);

        match rx.try_recv() {
            Ok(WorkflowEvent::StateChange(event)) => {
                assert_eq!(event.task_id, id);
                assert_eq!(event.from, TaskState::Failed);
                assert_eq!(event.to, TaskState::Created);
            }
            other => panic!("expected a state change, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_signals_are_dropped_for_finished_tasks() {
        let orch = orchestrator(ScriptedWorker::all());
        let tasks = vec![Task::new("a"), Task::new("b")];

        orch.run(tasks, 2).await.unwrap();

        assert!(orch
            .cancellations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty());
    }

    #[tokio::test]
    async fn test_reset_rejects_unfailed_task() {
        let orch = orchestrator(ScriptedWorker::all());
        let store = TaskStore::new();
        let id = store.insert(Task::new("x")).await.unwrap();

        assert!(matches!(
            orch.reset(&store, &id, "operator").await,
            Err(DevflowError::Store(_))
        ));
    }
}
