//! Stage worker backed by an LLM provider.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::prompts::{
    production_prompt, production_system_prompt, review_prompt, review_system_prompt,
};
use super::quality::QualityReport;
use super::worker::StageWorker;
use crate::error::CapabilityError;
use crate::feedback::{FeedbackParser, ValidationVerdict};
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::task::{Stage, StageOutput, Task};
use crate::utils::extract_json_object;

/// Temperature used for reviews, independent of the production temperature.
const REVIEW_TEMPERATURE: f64 = 0.1;

/// Token cap for reviews.
const REVIEW_MAX_TOKENS: u32 = 1024;

/// One pipeline stage served by chat completions.
pub struct LlmStageWorker {
    stage: Stage,
    llm: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    parser: FeedbackParser,
}

impl LlmStageWorker {
    pub fn new(stage: Stage, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            stage,
            llm,
            model: String::new(),
            temperature: 0.3,
            max_tokens: 4096,
            parser: FeedbackParser::new(),
        }
    }

    /// Model identifier. Empty defers to the provider's default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// A worker for every stage sharing one provider.
    pub fn all(
        llm: Arc<dyn LlmProvider>,
        model: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Vec<Arc<dyn StageWorker>> {
        Stage::ALL
            .iter()
            .map(|stage| {
                Arc::new(
                    LlmStageWorker::new(*stage, Arc::clone(&llm))
                        .with_model(model)
                        .with_temperature(temperature)
                        .with_max_tokens(max_tokens),
                ) as Arc<dyn StageWorker>
            })
            .collect()
    }

    async fn complete(
        &self,
        system: &str,
        user: String,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, CapabilityError> {
        let request = GenerationRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(user)],
        )
        .with_temperature(temperature)
        .with_max_tokens(max_tokens);

        let response = self.llm.generate(request).await?;
        let content = response.first_content().ok_or_else(|| {
            CapabilityError::MalformedResponse("response has no choices".to_string())
        })?;

        if content.trim().is_empty() {
            return Err(CapabilityError::MalformedResponse(
                "response content is empty".to_string(),
            ));
        }

        Ok(content.to_string())
    }

    fn details_for(&self, content: &str) -> serde_json::Value {
        match self.stage {
            Stage::Decomposition => extract_json_object(content)
                .and_then(|json| serde_json::from_str(&json).ok())
                .unwrap_or(serde_json::Value::Null),
            Stage::QualityAssessment => serde_json::to_value(QualityReport::parse(content))
                .unwrap_or(serde_json::Value::Null),
            _ => serde_json::Value::Null,
        }
    }
}

#[async_trait]
impl StageWorker for LlmStageWorker {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn produce(
        &self,
        task: &Task,
        feedback: Option<&str>,
    ) -> Result<StageOutput, CapabilityError> {
        let prompt = production_prompt(self.stage, task, feedback, &self.parser);
        debug!(
            task_id = %task.id,
            stage = %self.stage,
            retry = feedback.is_some(),
            prompt_len = prompt.len(),
            "Requesting stage output"
        );

        let content = self
            .complete(
                production_system_prompt(self.stage),
                prompt,
                self.temperature,
                self.max_tokens,
            )
            .await?;

        let details = self.details_for(&content);
        Ok(StageOutput::new(self.stage, content).with_details(details))
    }

    async fn validate(
        &self,
        upstream: &StageOutput,
        task: &Task,
    ) -> Result<ValidationVerdict, CapabilityError> {
        debug!(
            task_id = %task.id,
            reviewer = %self.stage,
            reviewed = %upstream.stage,
            "Requesting review"
        );

        let content = self
            .complete(
                &review_system_prompt(self.stage, upstream.stage),
                review_prompt(upstream, task),
                REVIEW_TEMPERATURE,
                REVIEW_MAX_TOKENS,
            )
            .await?;

        Ok(ValidationVerdict::from_llm_response(&content))
    }
}

impl std::fmt::Debug for LlmStageWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmStageWorker")
            .field("stage", &self.stage)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}
