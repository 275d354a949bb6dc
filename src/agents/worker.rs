//! The uniform stage worker interface.
//!
//! Every stage is served by one worker that can both produce that stage's
//! output and review the output of the stage before it. The validation loop
//! is written once against this trait.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::CapabilityError;
use crate::feedback::ValidationVerdict;
use crate::pipeline::config::ConfigError;
use crate::task::{Stage, StageOutput, Task};

/// A worker for one pipeline stage.
#[async_trait]
pub trait StageWorker: Send + Sync {
    /// The stage this worker produces output for.
    fn stage(&self) -> Stage;

    /// Produce this stage's output for `task`.
    ///
    /// Upstream outputs are read from the task's metadata. `feedback` carries
    /// the reviewer's rejection text on a retry.
    async fn produce(
        &self,
        task: &Task,
        feedback: Option<&str>,
    ) -> Result<StageOutput, CapabilityError>;

    /// Review `upstream`, an output this worker is about to build on.
    async fn validate(
        &self,
        upstream: &StageOutput,
        task: &Task,
    ) -> Result<ValidationVerdict, CapabilityError>;
}

/// One worker per stage, indexed by pipeline position.
#[derive(Clone)]
pub struct StageWorkers {
    workers: [Arc<dyn StageWorker>; 5],
}

impl StageWorkers {
    /// Assemble a complete worker set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` when a stage has no worker or
    /// two workers claim the same stage.
    pub fn new(workers: Vec<Arc<dyn StageWorker>>) -> Result<Self, ConfigError> {
        let mut by_stage = BTreeMap::new();
        for worker in workers {
            let stage = worker.stage();
            if by_stage.insert(stage, worker).is_some() {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate worker for stage {}",
                    stage
                )));
            }
        }

        let missing: Vec<&str> = Stage::ALL
            .iter()
            .filter(|stage| !by_stage.contains_key(*stage))
            .map(|stage| stage.as_str())
            .collect();
        let ordered: Vec<Arc<dyn StageWorker>> = Stage::ALL
            .iter()
            .filter_map(|stage| by_stage.remove(stage))
            .collect();
        let workers = ordered.try_into().map_err(|_| {
            ConfigError::ValidationFailed(format!(
                "missing workers for stages: {}",
                missing.join(", ")
            ))
        })?;

        Ok(Self { workers })
    }

    /// The worker producing `stage`'s output.
    pub fn producer(&self, stage: Stage) -> &Arc<dyn StageWorker> {
        &self.workers[stage.index()]
    }

    /// The worker that reviews `stage`'s output: the next stage's worker,
    /// or the integration worker itself for the final acceptance check.
    pub fn validator_for(&self, stage: Stage) -> &Arc<dyn StageWorker> {
        self.producer(stage.next().unwrap_or(stage))
    }
}

impl std::fmt::Debug for StageWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageWorkers")
            .field(
                "stages",
                &self.workers.iter().map(|w| w.stage()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Stage);

    #[async_trait]
    impl StageWorker for Fixed {
        fn stage(&self) -> Stage {
            self.0
        }

        async fn produce(
            &self,
            _task: &Task,
            _feedback: Option<&str>,
        ) -> Result<StageOutput, CapabilityError> {
            Ok(StageOutput::new(self.0, "ok"))
        }

        async fn validate(
            &self,
            _upstream: &StageOutput,
            _task: &Task,
        ) -> Result<ValidationVerdict, CapabilityError> {
            Ok(ValidationVerdict::pass(1.0))
        }
    }

    fn all_workers() -> Vec<Arc<dyn StageWorker>> {
        Stage::ALL
            .iter()
            .map(|stage| Arc::new(Fixed(*stage)) as Arc<dyn StageWorker>)
            .collect()
    }

    #[test]
    fn test_validator_is_next_stage_worker() {
        let workers = StageWorkers::new(all_workers()).unwrap();
        assert_eq!(
            workers.validator_for(Stage::Decomposition).stage(),
            Stage::Implementation
        );
        assert_eq!(
            workers.validator_for(Stage::QualityAssessment).stage(),
            Stage::Integration
        );
        assert_eq!(
            workers.validator_for(Stage::Integration).stage(),
            Stage::Integration
        );
    }

    #[test]
    fn test_missing_stage_rejected() {
        let mut workers = all_workers();
        workers.pop();
        let err = StageWorkers::new(workers).unwrap_err();
        assert!(err.to_string().contains("integration"));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mut workers = all_workers();
        workers.push(Arc::new(Fixed(Stage::Testing)));
        assert!(StageWorkers::new(workers).is_err());
    }
}
