//! LLM client for OpenAI-compatible chat completion providers
//!
//! Used for structured (JSON) output by the reasoning chain.

use anyhow::{Result, Context, bail};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

// ============ Provider Configuration ============

/// Configuration for an LLM API provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL for the API (e.g., "https://openrouter.ai/api/v1")
    pub base_url: String,
    /// API key for authentication
    pub api_key: String,
}

impl ProviderConfig {
    /// Any OpenAI-compatible endpoint
    pub fn custom(base_url: impl Into<String>, api_key: String) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

// ============ Multimodal Content Support ============

/// Content part for multimodal messages (text + images)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image URL for multimodal messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// URL or data URI (e.g., "data:image/png;base64,...")
    pub url: String,
}

impl ContentPart {
    /// Create a text content part
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Create an image content part from base64 data
    pub fn image_base64(base64_data: &str, media_type: &str) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{}", media_type, base64_data),
            },
        }
    }
}

/// A role-tagged message as sent to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: Value::String(content.into()) }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: Value::String(content.into()) }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: Value::String(content.into()) }
    }

    /// Create a user message with multiple content parts
    pub fn user_multimodal(parts: Vec<ContentPart>) -> Self {
        let content_array: Vec<Value> = parts.iter()
            .filter_map(|p| serde_json::to_value(p).ok())
            .collect();
        Self { role: "user".to_string(), content: Value::Array(content_array) }
    }

    /// Extract content as plain text, handling both string and array-of-content-parts formats.
    pub fn content_as_text(&self) -> Option<String> {
        match &self.content {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => {
                let texts: Vec<&str> = parts.iter()
                    .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                    .collect();
                if texts.is_empty() { None } else { Some(texts.join("")) }
            }
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Sampling and size options for one completion
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Ask the provider for a JSON object response
    pub json_mode: bool,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

/// LLM API client
#[derive(Clone)]
pub struct LlmClient {
    client: Arc<Client>,
    provider: ProviderConfig,
    model: String,
}

impl LlmClient {
    /// Create a client with a specific provider configuration
    pub fn new(provider: ProviderConfig, model: impl Into<String>) -> Self {
        Self {
            client: Arc::new(Client::new()),
            provider,
            model: model.into(),
        }
    }

    /// Create client from config, reading the API key from the keyring
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let api_key = crate::security::get_api_key()?;
        let provider = ProviderConfig::custom(&config.llm.base_url, api_key);
        Ok(Self::new(provider, &config.reasoning.model))
    }

    /// Send a chat completion request and return the text content
    pub async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            response_format: options.json_mode.then(|| serde_json::json!({ "type": "json_object" })),
        };

        let response = self.client
            .post(format!("{}/chat/completions", self.provider.base_url))
            .header("Authorization", format!("Bearer {}", self.provider.api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to send request to LLM provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM API error ({}): {}", status, body);
        }

        let body = response.text().await.context("Failed to read response body")?;
        debug!("LLM response: {}", crate::truncate_safe(&body, 500));

        let raw_response: Value = serde_json::from_str(&body)
            .map_err(|e| anyhow::anyhow!("Failed to parse JSON response: {} (body: {})",
                e, crate::truncate_safe(&body, 500)))?;

        let message = raw_response
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("message"))
            .cloned()
            .context("LLM response has no choices")?;

        let message: ChatMessage = serde_json::from_value(message)
            .context("LLM response message is malformed")?;
        Ok(message.content_as_text().unwrap_or_default())
    }

    /// Completion whose content must deserialize into `T`
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<T> {
        let mut options = options.clone();
        options.json_mode = true;
        let content = self.complete(messages, &options).await?;
        parse_json_content(&content)
    }
}

/// Parse a JSON object out of model output, tolerating code fences and
/// surrounding prose.
pub fn parse_json_content<T: DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&trimmed[start..=end])
            .with_context(|| format!("Model output is not valid JSON: {}", crate::truncate_safe(trimmed, 200))),
        _ => bail!("Model output contains no JSON object: {}", crate::truncate_safe(trimmed, 200)),
    }
}
