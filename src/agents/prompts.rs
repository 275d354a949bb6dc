//! Prompt construction for LLM-backed stage workers.

use crate::feedback::FeedbackParser;
use crate::task::{Stage, StageOutput, Task};

const DECOMPOSITION_SYSTEM_PROMPT: &str = r#"You are a senior software architect.
Break the task into small, ordered subtasks. For each subtask give a title,
a description, a priority (0-100) and the titles of subtasks it depends on.
Return a JSON object: {"subtasks": [{"title", "description", "priority", "dependencies"}]}
followed by any notes."#;

const IMPLEMENTATION_SYSTEM_PROMPT: &str = r#"You are an expert software engineer.
Implement the plan you are given. Return complete, runnable source files in
fenced code blocks, each preceded by its file path. Handle errors explicitly."#;

const TESTING_SYSTEM_PROMPT: &str = r#"You are a test engineer.
Write an automated test suite for the implementation you are given. Cover the
main behavior, edge cases and error handling. Return the test files in fenced
code blocks, then a short section "TEST RESULTS" predicting which tests pass."#;

const QUALITY_SYSTEM_PROMPT: &str = r#"You are a code quality reviewer.
Assess the implementation and its tests for correctness, readability,
maintainability and security. End the report with the lines
"OVERALL QUALITY SCORE: <0-10>" and one of
"APPROVED FOR INTEGRATION", "NEEDS IMPROVEMENT" or "REJECTED"."#;

const INTEGRATION_SYSTEM_PROMPT: &str = r#"You are a release engineer.
Prepare the reviewed implementation for integration: list the files to add,
the dependencies to declare and the steps to wire it into the project."#;

const REVIEW_CONTRACT: &str = r#"Reply with a single JSON object and nothing else:
{"is_valid": bool, "confidence": 0.0-1.0, "issues": [string], "feedback": string, "can_proceed": bool}
Set is_valid to false only for problems that stop you from doing your own work,
and explain in feedback what must change."#;

/// Cap on how much of an upstream output is quoted into a prompt.
const MAX_QUOTED_CHARS: usize = 24_000;

pub fn production_system_prompt(stage: Stage) -> &'static str {
    match stage {
        Stage::Decomposition => DECOMPOSITION_SYSTEM_PROMPT,
        Stage::Implementation => IMPLEMENTATION_SYSTEM_PROMPT,
        Stage::Testing => TESTING_SYSTEM_PROMPT,
        Stage::QualityAssessment => QUALITY_SYSTEM_PROMPT,
        Stage::Integration => INTEGRATION_SYSTEM_PROMPT,
    }
}

/// System prompt for `reviewer` judging an output of `reviewed`.
pub fn review_system_prompt(reviewer: Stage, reviewed: Stage) -> String {
    let role = match reviewer {
        Stage::Decomposition => "software architect",
        Stage::Implementation => "software engineer about to implement",
        Stage::Testing => "test engineer about to write tests for",
        Stage::QualityAssessment => "quality reviewer about to assess",
        Stage::Integration => "release engineer about to integrate",
    };
    if reviewer == reviewed {
        format!(
            "You are a {} and must give final acceptance of your own stage's {} output.\n{}",
            role, reviewed, REVIEW_CONTRACT
        )
    } else {
        format!(
            "You are a {} the {} output below. Decide whether it is good enough to build on.\n{}",
            role, reviewed, REVIEW_CONTRACT
        )
    }
}

/// Upstream stages whose outputs a stage consumes.
fn inputs_for(stage: Stage) -> &'static [Stage] {
    match stage {
        Stage::Decomposition => &[],
        Stage::Implementation => &[Stage::Decomposition],
        Stage::Testing => &[Stage::Implementation],
        Stage::QualityAssessment => &[Stage::Testing, Stage::Implementation],
        Stage::Integration => &[Stage::Implementation, Stage::Testing, Stage::QualityAssessment],
    }
}

fn quote(output: &StageOutput) -> String {
    let content = &output.content;
    if content.chars().count() <= MAX_QUOTED_CHARS {
        return content.clone();
    }
    let truncated: String = content.chars().take(MAX_QUOTED_CHARS).collect();
    format!("{}\n[... truncated ...]", truncated)
}

fn task_brief(task: &Task, description: &str) -> String {
    let mut brief = format!("Task: {}\nLanguage: {}\n", description, task.language);
    if !task.requirements.is_empty() {
        brief.push_str("Requirements:\n");
        for requirement in &task.requirements {
            brief.push_str(&format!("- {}\n", requirement));
        }
    }
    brief
}

/// User prompt for producing `stage`'s output.
///
/// On a retry the reviewer's feedback is quoted verbatim and the task
/// description is enriched with directives parsed from it.
pub fn production_prompt(
    stage: Stage,
    task: &Task,
    feedback: Option<&str>,
    parser: &FeedbackParser,
) -> String {
    let mut prompt = String::new();

    match feedback {
        Some(feedback) => {
            let enhanced = parser.enhance_from_feedback(&task.description, feedback, stage);
            let reviewer = stage.next().unwrap_or(stage);
            prompt.push_str(&format!("ORIGINAL TASK: {}\n\n", task.description));
            prompt.push_str(&format!(
                "FEEDBACK FROM {}: {}\n\n",
                reviewer.as_str().to_uppercase(),
                feedback
            ));
            prompt.push_str(&format!(
                "Please improve your {} output to address this feedback.\n\n",
                stage
            ));
            prompt.push_str(&task_brief(task, &enhanced));
        }
        None => prompt.push_str(&task_brief(task, &task.description)),
    }

    for input in inputs_for(stage) {
        if let Some(output) = task.stage_output(*input) {
            prompt.push_str(&format!("\n## {} output\n{}\n", input, quote(output)));
        }
    }

    prompt
}

/// User prompt for reviewing an upstream output.
pub fn review_prompt(upstream: &StageOutput, task: &Task) -> String {
    format!(
        "{}\n## {} output to review\n{}\n",
        task_brief(task, &task.description),
        upstream.stage,
        quote(upstream)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_prompt_includes_upstream() {
        let mut task = Task::new("Build a cache").with_requirements(vec!["LRU eviction".into()]);
        task.put_stage_output(StageOutput::new(Stage::Decomposition, "1. map\n2. list"));

        let prompt = production_prompt(Stage::Implementation, &task, None, &FeedbackParser::new());

        assert!(prompt.starts_with("Task: Build a cache"));
        assert!(prompt.contains("- LRU eviction"));
        assert!(prompt.contains("## decomposition output\n1. map"));
        assert!(!prompt.contains("FEEDBACK FROM"));
    }

    #[test]
    fn test_retry_prompt_quotes_feedback() {
        let task = Task::new("Build a cache");
        let prompt = production_prompt(
            Stage::Decomposition,
            &task,
            Some("Missing eviction policy."),
            &FeedbackParser::new(),
        );

        assert!(prompt.starts_with("ORIGINAL TASK: Build a cache"));
        assert!(prompt.contains("FEEDBACK FROM IMPLEMENTATION: Missing eviction policy."));
        assert!(prompt.contains("Requirements: Include eviction policy"));
    }

    #[test]
    fn test_review_system_prompt_final_acceptance() {
        let prompt = review_system_prompt(Stage::Integration, Stage::Integration);
        assert!(prompt.contains("final acceptance"));
        assert!(prompt.contains("\"is_valid\""));
    }

    #[test]
    fn test_long_outputs_are_truncated() {
        let output = StageOutput::new(Stage::Implementation, "x".repeat(MAX_QUOTED_CHARS + 10));
        let quoted = quote(&output);
        assert!(quoted.ends_with("[... truncated ...]"));
    }
}
