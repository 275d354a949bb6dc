//! Pipeline stages and their mapping onto lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::TaskState;

/// One phase of the task pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decomposition,
    Implementation,
    Testing,
    QualityAssessment,
    Integration,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Decomposition,
        Stage::Implementation,
        Stage::Testing,
        Stage::QualityAssessment,
        Stage::Integration,
    ];

    /// Metadata key and label for this stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decomposition => "decomposition",
            Stage::Implementation => "implementation",
            Stage::Testing => "testing",
            Stage::QualityAssessment => "quality_assessment",
            Stage::Integration => "integration",
        }
    }

    /// Zero-based position in the pipeline.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The stage that runs after this one, if any.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Decomposition => Some(Stage::Implementation),
            Stage::Implementation => Some(Stage::Testing),
            Stage::Testing => Some(Stage::QualityAssessment),
            Stage::QualityAssessment => Some(Stage::Integration),
            Stage::Integration => None,
        }
    }

    /// The state a task waits in before this stage starts.
    pub fn ready_state(&self) -> TaskState {
        match self {
            Stage::Decomposition => TaskState::Created,
            Stage::Implementation => TaskState::ReadyForImplementation,
            Stage::Testing => TaskState::ReadyForTesting,
            Stage::QualityAssessment => TaskState::ReadyForQuality,
            Stage::Integration => TaskState::ReadyForIntegration,
        }
    }

    /// The state a task is in while this stage runs.
    pub fn active_state(&self) -> TaskState {
        match self {
            Stage::Decomposition => TaskState::Decomposing,
            Stage::Implementation => TaskState::Implementing,
            Stage::Testing => TaskState::Testing,
            Stage::QualityAssessment => TaskState::QualityCheck,
            Stage::Integration => TaskState::Integrating,
        }
    }

    /// The state entered once this stage's output has been approved.
    pub fn approved_state(&self) -> TaskState {
        match self.next() {
            Some(next) => next.ready_state(),
            None => TaskState::Completed,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_chain_matches_state_sequence() {
        for stage in Stage::ALL {
            assert_eq!(stage.ready_state().successor(), Some(stage.active_state()));
            assert_eq!(stage.active_state().successor(), Some(stage.approved_state()));
        }
        assert_eq!(Stage::Integration.approved_state(), TaskState::Completed);
    }

    #[test]
    fn test_stage_serializes_as_metadata_key() {
        let json = serde_json::to_string(&Stage::QualityAssessment).unwrap();
        assert_eq!(json, "\"quality_assessment\"");
        assert_eq!(Stage::QualityAssessment.to_string(), "quality_assessment");
    }
}
