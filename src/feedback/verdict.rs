//! Validation verdicts.

use serde::{Deserialize, Serialize};

use crate::utils::json_extraction::{extract_json_object, outer_brace_span};

/// Feedback used when a rejection arrives without any explanation.
const UNEXPLAINED_REJECTION: &str = "Output rejected without explanation";

/// Pass/fail judgment of one worker on another worker's output.
///
/// Immutable once built. A failing verdict always carries non-empty
/// feedback; a passing verdict never carries any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    passed: bool,
    confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<String>,
}

impl ValidationVerdict {
    /// A passing verdict.
    pub fn pass(confidence: f64) -> Self {
        Self {
            passed: true,
            confidence: clamp_confidence(confidence),
            feedback: None,
            issues: Vec::new(),
        }
    }

    /// A failing verdict. Blank feedback is replaced by the listed issues or
    /// a generic explanation.
    pub fn fail(feedback: impl Into<String>, confidence: f64, issues: Vec<String>) -> Self {
        let feedback = feedback.into();
        let feedback = if !feedback.trim().is_empty() {
            feedback.trim().to_string()
        } else if !issues.is_empty() {
            issues.join("; ")
        } else {
            UNEXPLAINED_REJECTION.to_string()
        };

        Self {
            passed: false,
            confidence: clamp_confidence(confidence),
            feedback: Some(feedback),
            issues,
        }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Advisory confidence in [0, 1].
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Rejection feedback; `None` for a passing verdict.
    pub fn feedback(&self) -> Option<&str> {
        self.feedback.as_deref()
    }

    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    /// Parse a reviewer's reply.
    ///
    /// Expected shape: `{"is_valid", "confidence", "issues", "feedback",
    /// "can_proceed"}`. A reply with no JSON object at all, or one that does
    /// not parse, becomes a failing verdict explaining the format problem.
    pub fn from_llm_response(content: &str) -> Self {
        if outer_brace_span(content).is_none() {
            return Self::fail(
                "Response format was not JSON",
                0.5,
                vec!["Response format was not JSON".to_string()],
            );
        }

        let parsed = extract_json_object(content)
            .and_then(|json| serde_json::from_str::<ReviewResponse>(&json).ok());

        match parsed {
            Some(review) => review.into_verdict(),
            None => Self::fail(
                "Failed to parse validation response",
                0.0,
                vec!["Failed to parse validation response".to_string()],
            ),
        }
    }
}

/// Wire shape of a reviewer reply.
#[derive(Debug, Deserialize)]
struct ReviewResponse {
    #[serde(default)]
    is_valid: bool,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    feedback: String,
    #[serde(default = "default_can_proceed")]
    can_proceed: bool,
}

impl ReviewResponse {
    fn into_verdict(self) -> ValidationVerdict {
        if self.is_valid && self.can_proceed {
            ValidationVerdict::pass(self.confidence)
        } else {
            ValidationVerdict::fail(self.feedback, self.confidence, self.issues)
        }
    }
}

fn default_confidence() -> f64 {
    0.5
}

fn default_can_proceed() -> bool {
    true
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}
