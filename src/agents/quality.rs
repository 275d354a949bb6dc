//! Parsing of quality assessment reports.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Final call of a quality assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Approved,
    NeedsImprovement,
    Rejected,
    Unknown,
}

/// Structured fields of a quality report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// `OVERALL QUALITY SCORE` as written by the assessor, if present.
    pub score: Option<f64>,
    pub recommendation: Recommendation,
}

fn score_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)OVERALL QUALITY SCORE:\s*(\d+(?:\.\d+)?)").ok())
        .as_ref()
}

impl QualityReport {
    pub fn parse(content: &str) -> Self {
        let score = score_pattern()
            .and_then(|re| re.captures(content))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok());

        let upper = content.to_uppercase();
        let recommendation = if upper.contains("APPROVED FOR INTEGRATION") {
            Recommendation::Approved
        } else if upper.contains("NEEDS IMPROVEMENT") {
            Recommendation::NeedsImprovement
        } else if upper.contains("REJECTED") {
            Recommendation::Rejected
        } else {
            Recommendation::Unknown
        };

        Self {
            score,
            recommendation,
        }
    }
}
