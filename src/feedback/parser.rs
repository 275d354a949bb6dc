//! Turns free-text reviewer feedback into prompt improvements.
//!
//! Reviewers write feedback like "missing input validation. The test
//! execution failed with an ImportError". Regenerating with the raw text
//! works, but a short list of concrete directives ("Include input
//! validation", "Ensure all necessary imports are included") steers the
//! next attempt better. Both are sent on retry.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::task::Stage;

/// Directive extracted from feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptImprovement {
    pub category: ImprovementCategory,
    pub text: String,
    /// 1-10; higher is more important.
    pub weight: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementCategory {
    Technical,
    Requirement,
    Testing,
}

/// Requirement phrases: capture group is the subject, `{}` in the template
/// is replaced by it.
const REQUIREMENT_PATTERNS: &[(&str, &str, u8)] = &[
    (r"lacks tests for ([^.;\n]+)", "Include tests for {}", 9),
    (r"missing ([^.;\n]+)", "Include {}", 9),
    (r"\badd ([^.;\n]+)", "Add {}", 8),
    (r"\binclude ([^.;\n]+)", "Include {}", 8),
    (r"\bensure ([^.;\n]+)", "Ensure {}", 7),
    (r"\bconsider ([^.;\n]+)", "Consider {}", 6),
    (r"\bneeds? ([^.;\n]+)", "Needs {}", 8),
    (r"\brequires? ([^.;\n]+)", "Requires {}", 9),
    (r"could benefit from ([^.;\n]+)", "Include {}", 7),
];

const TECHNICAL_PATTERNS: &[(&str, &str, u8)] = &[
    (r"importerror|modulenotfounderror", "Ensure all necessary imports are included", 9),
    (r"execution failed", "Make code executable and testable", 9),
    (r"syntax error", "Use correct syntax", 10),
    (r"dependency issues", "Include all required dependencies", 8),
    (r"configuration.*issues", "Include proper configuration", 7),
];

const TESTING_PATTERNS: &[(&str, &str, u8)] = &[
    (r"test coverage", "comprehensive test coverage", 8),
    (r"edge cases?", "edge case testing", 7),
    (r"integration tests?", "integration tests", 8),
    (r"performance tests?", "performance testing", 6),
    (r"error handling", "proper error handling", 8),
    (r"cleanup", "test cleanup and isolation", 7),
];

/// Maximum directives listed per category in an enhanced description.
const PER_CATEGORY_LIMIT: usize = 3;

/// Compiled feedback patterns.
#[derive(Debug)]
pub struct FeedbackParser {
    requirement: Vec<(Regex, &'static str, u8)>,
    technical: Vec<(Regex, &'static str, u8)>,
    testing: Vec<(Regex, &'static str, u8)>,
}

impl FeedbackParser {
    pub fn new() -> Self {
        Self {
            requirement: compile(REQUIREMENT_PATTERNS),
            technical: compile(TECHNICAL_PATTERNS),
            testing: compile(TESTING_PATTERNS),
        }
    }

    /// Extract directives, deduplicated and heaviest first.
    ///
    /// Testing directives are only extracted when the feedback targets the
    /// testing stage.
    pub fn parse(&self, feedback: &str, stage: Stage) -> Vec<PromptImprovement> {
        let lowered = feedback.to_lowercase();
        let mut improvements = Vec::new();

        for (re, template, weight) in &self.requirement {
            for caps in re.captures_iter(&lowered) {
                if let Some(subject) = caps.get(1) {
                    improvements.push(PromptImprovement {
                        category: ImprovementCategory::Requirement,
                        text: template.replace("{}", subject.as_str().trim()),
                        weight: *weight,
                    });
                }
            }
        }

        for (re, text, weight) in &self.technical {
            if re.is_match(&lowered) {
                improvements.push(PromptImprovement {
                    category: ImprovementCategory::Technical,
                    text: text.to_string(),
                    weight: *weight,
                });
            }
        }

        if stage == Stage::Testing {
            for (re, text, weight) in &self.testing {
                if re.is_match(&lowered) {
                    improvements.push(PromptImprovement {
                        category: ImprovementCategory::Testing,
                        text: text.to_string(),
                        weight: *weight,
                    });
                }
            }
        }

        let mut seen = HashSet::new();
        improvements.retain(|imp| seen.insert((imp.category, imp.text.to_lowercase())));
        // Stable: equal weights keep discovery order.
        improvements.sort_by(|a, b| b.weight.cmp(&a.weight));
        improvements
    }

    /// Append grouped directives to a task description.
    pub fn enhance(&self, original: &str, improvements: &[PromptImprovement]) -> String {
        if improvements.is_empty() {
            return original.to_string();
        }

        let mut grouped: BTreeMap<ImprovementCategory, Vec<&str>> = BTreeMap::new();
        for imp in improvements {
            grouped.entry(imp.category).or_default().push(imp.text.as_str());
        }

        let mut enhanced = original.trim_end_matches('.').to_string();
        if let Some(technical) = grouped.get(&ImprovementCategory::Technical) {
            enhanced.push_str(&format!(". {}", technical.join(", ")));
        }
        if let Some(requirements) = grouped.get(&ImprovementCategory::Requirement) {
            let top: Vec<&str> = requirements.iter().take(PER_CATEGORY_LIMIT).copied().collect();
            enhanced.push_str(&format!(". Requirements: {}", top.join(", ")));
        }
        if let Some(testing) = grouped.get(&ImprovementCategory::Testing) {
            let top: Vec<&str> = testing.iter().take(PER_CATEGORY_LIMIT).copied().collect();
            enhanced.push_str(&format!(". Testing: {}", top.join(", ")));
        }
        enhanced
    }

    /// `parse` then `enhance` in one step.
    pub fn enhance_from_feedback(&self, original: &str, feedback: &str, stage: Stage) -> String {
        let improvements = self.parse(feedback, stage);
        self.enhance(original, &improvements)
    }
}

impl Default for FeedbackParser {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(patterns: &[(&str, &'static str, u8)]) -> Vec<(Regex, &'static str, u8)> {
    patterns
        .iter()
        .filter_map(|(pattern, template, weight)| {
            Regex::new(pattern).ok().map(|re| (re, *template, *weight))
        })
        .collect()
}
