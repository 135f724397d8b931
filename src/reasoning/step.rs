//! Reasoning steps and the structured-output capability that produces them

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::agent::llm::{ChatMessage, CompletionOptions, LlmClient};

/// What the model wants to do after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Continue,
    Reflect,
    FinalAnswer,
}

impl NextAction {
    /// Lenient parse; anything unrecognized means continue
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "reflect" => NextAction::Reflect,
            "final_answer" => NextAction::FinalAnswer,
            _ => NextAction::Continue,
        }
    }
}

impl<'de> Deserialize<'de> for NextAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(NextAction::parse(&raw))
    }
}

/// A step as returned by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub title: String,
    pub content: String,
    pub next_action: NextAction,
    pub confidence: f64,
}

/// A model response that does not describe a usable step
#[derive(Debug, Error, PartialEq)]
pub enum StepError {
    #[error("confidence {0} is outside [0.0, 1.0]")]
    ConfidenceOutOfRange(f64),
    #[error("step has no title")]
    MissingTitle,
}

impl StepResponse {
    pub fn validate(&self) -> Result<(), StepError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(StepError::ConfidenceOutOfRange(self.confidence));
        }
        if self.title.trim().is_empty() {
            return Err(StepError::MissingTitle);
        }
        Ok(())
    }

    /// Stand-in step used once every attempt failed
    pub fn degraded(is_final: bool, attempts: u32, error: &str) -> Self {
        let what = if is_final { "final answer" } else { "step" };
        Self {
            title: "Error".to_string(),
            content: format!("Failed to generate {} after {} attempts. Error: {}", what, attempts, error),
            next_action: NextAction::FinalAnswer,
            confidence: 0.5,
        }
    }
}

/// A completed step with its timing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningStep {
    pub title: String,
    pub content: String,
    pub next_action: NextAction,
    pub confidence: f64,
    /// Seconds spent producing this step
    pub elapsed_time: f64,
}

impl ReasoningStep {
    pub fn from_response(response: StepResponse, elapsed_time: f64) -> Self {
        Self {
            title: response.title,
            content: response.content,
            next_action: response.next_action,
            confidence: response.confidence,
            elapsed_time: elapsed_time.max(0.0),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.title == "Error" && self.content.starts_with("Failed to generate")
    }
}

/// Structured-output capability used by the chain
#[async_trait]
pub trait StepGenerator: Send + Sync {
    /// Produce the next step for `history` under `system`
    async fn generate_step(&self, system: &str, history: &[ChatMessage], max_tokens: u32) -> Result<StepResponse>;
}

/// [`StepGenerator`] backed by an OpenAI-compatible [`LlmClient`]
#[derive(Clone)]
pub struct LlmStepGenerator {
    client: LlmClient,
    temperature: f32,
    top_p: f32,
}

impl LlmStepGenerator {
    pub fn new(client: LlmClient, temperature: f32, top_p: f32) -> Self {
        Self { client, temperature, top_p }
    }

    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let client = LlmClient::from_config(config)?;
        Ok(Self::new(client, config.reasoning.temperature, config.reasoning.top_p))
    }
}

#[async_trait]
impl StepGenerator for LlmStepGenerator {
    async fn generate_step(&self, system: &str, history: &[ChatMessage], max_tokens: u32) -> Result<StepResponse> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend_from_slice(history);

        let options = CompletionOptions {
            max_tokens: Some(max_tokens),
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            json_mode: true,
        };
        let step: StepResponse = self.client.complete_json(&messages, &options).await?;
        step.validate()?;
        Ok(step)
    }
}
