//! Append-only log of validation outcomes and derived statistics.
//!
//! Every verdict the validation loop receives is archived here as a
//! [`FeedbackRecord`]. Records are never edited except for the retry outcome
//! flag, which is filled in once the next attempt at the same boundary has
//! been judged.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use super::verdict::ValidationVerdict;
use crate::task::{Stage, TaskId};

/// Number of issues reported in stats summaries.
const TOP_ISSUES: usize = 5;

/// An archived verdict.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRecord {
    pub task_id: TaskId,
    /// Stage whose worker produced the verdict.
    pub source_stage: Stage,
    /// Stage whose output was judged.
    pub target_stage: Stage,
    pub verdict: ValidationVerdict,
    /// Zero-based attempt the verdict corresponds to.
    pub retry_index: u32,
    pub recorded_at: DateTime<Utc>,
    /// For a failing verdict: whether the regenerated output passed next time.
    pub retry_successful: Option<bool>,
}

impl FeedbackRecord {
    pub fn new(
        task_id: TaskId,
        source_stage: Stage,
        target_stage: Stage,
        verdict: ValidationVerdict,
        retry_index: u32,
    ) -> Self {
        Self {
            task_id,
            source_stage,
            target_stage,
            verdict,
            retry_index,
            recorded_at: Utc::now(),
            retry_successful: None,
        }
    }
}

/// Feedback received by one stage's outputs.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeedbackStats {
    pub stage: Stage,
    pub received_count: usize,
    pub rejected_count: usize,
    pub common_issues: Vec<(String, usize)>,
    pub retry_success_rate: f64,
    pub avg_confidence: f64,
}

/// Feedback history of one task.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskFeedbackSummary {
    pub task_id: TaskId,
    pub total_records: usize,
    pub by_validator: BTreeMap<Stage, usize>,
    pub common_issues: Vec<(String, usize)>,
    pub retry_success_rate: f64,
}

/// Shared feedback log.
#[derive(Debug, Default)]
pub struct FeedbackTracker {
    records: RwLock<Vec<FeedbackRecord>>,
}

impl FeedbackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: FeedbackRecord) {
        self.write().push(record);
    }

    /// Fill in the outcome of the latest failed, still-open record for this
    /// task and boundary. Returns whether a record was updated.
    pub fn mark_retry_outcome(
        &self,
        task_id: &TaskId,
        source_stage: Stage,
        target_stage: Stage,
        successful: bool,
    ) -> bool {
        let mut records = self.write();
        let open = records.iter_mut().rev().find(|record| {
            record.task_id == *task_id
                && record.source_stage == source_stage
                && record.target_stage == target_stage
                && !record.verdict.passed()
                && record.retry_successful.is_none()
        });
        match open {
            Some(record) => {
                record.retry_successful = Some(successful);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<FeedbackRecord> {
        self.read().clone()
    }

    /// Records for one validator/validated pair, oldest first.
    pub fn records_for_boundary(
        &self,
        source_stage: Stage,
        target_stage: Stage,
    ) -> Vec<FeedbackRecord> {
        self.filtered(|r| r.source_stage == source_stage && r.target_stage == target_stage)
    }

    pub fn records_for_task(&self, task_id: &TaskId) -> Vec<FeedbackRecord> {
        self.filtered(|r| r.task_id == *task_id)
    }

    /// Statistics over the verdicts a stage's outputs received.
    pub fn stats_for(&self, stage: Stage) -> FeedbackStats {
        let received = self.filtered(|r| r.target_stage == stage);
        let rejected_count = received.iter().filter(|r| !r.verdict.passed()).count();
        let avg_confidence = if received.is_empty() {
            0.0
        } else {
            received.iter().map(|r| r.verdict.confidence()).sum::<f64>() / received.len() as f64
        };

        FeedbackStats {
            stage,
            received_count: received.len(),
            rejected_count,
            common_issues: top_issues(&received, TOP_ISSUES),
            retry_success_rate: retry_success_rate(&received),
            avg_confidence,
        }
    }

    /// Most frequent issues reported against a stage's outputs.
    pub fn common_issues_for(&self, stage: Stage, limit: usize) -> Vec<(String, usize)> {
        top_issues(&self.filtered(|r| r.target_stage == stage), limit)
    }

    /// Records from the last `hours`, newest first.
    ///
    /// A window too large to represent covers every record.
    pub fn recent(&self, hours: i64, limit: usize) -> Vec<FeedbackRecord> {
        let cutoff = TimeDelta::try_hours(hours)
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let mut recent = match cutoff {
            Some(cutoff) => self.filtered(|r| r.recorded_at >= cutoff),
            None => self.all(),
        };
        recent.reverse();
        recent.truncate(limit);
        recent
    }

    pub fn task_summary(&self, task_id: &TaskId) -> TaskFeedbackSummary {
        let records = self.records_for_task(task_id);
        let mut by_validator = BTreeMap::new();
        for record in &records {
            *by_validator.entry(record.source_stage).or_insert(0) += 1;
        }

        TaskFeedbackSummary {
            task_id: task_id.clone(),
            total_records: records.len(),
            by_validator,
            common_issues: top_issues(&records, TOP_ISSUES),
            retry_success_rate: retry_success_rate(&records),
        }
    }

    fn filtered(&self, predicate: impl Fn(&FeedbackRecord) -> bool) -> Vec<FeedbackRecord> {
        self.read().iter().filter(|r| predicate(r)).cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<FeedbackRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<FeedbackRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn top_issues(records: &[FeedbackRecord], limit: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        for issue in record.verdict.issues() {
            *counts.entry(issue.as_str()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(issue, count)| (issue.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

fn retry_success_rate(records: &[FeedbackRecord]) -> f64 {
    let outcomes: Vec<bool> = records.iter().filter_map(|r| r.retry_successful).collect();
    if outcomes.is_empty() {
        return 0.0;
    }
    outcomes.iter().filter(|ok| **ok).count() as f64 / outcomes.len() as f64
}
