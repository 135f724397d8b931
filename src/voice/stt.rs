//! Speech-to-text for spoken prompts
//!
//! Uploads recorded audio to an OpenAI-compatible `/audio/transcriptions`
//! endpoint. Audio the service cannot make sense of becomes a fixed apology
//! string so the turn can still proceed; transport failures are errors.

use anyhow::{Result, Context, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Returned when the audio contained no recognizable speech
pub const NOT_UNDERSTOOD: &str = "Speech Recognition could not understand audio";

/// Default transcription model
pub const DEFAULT_STT_MODEL: &str = "whisper-1";

/// Speech recognition capability
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe encoded audio (WAV, MP3, ...) spoken in `language`
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str, language: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// HTTP transcription client
#[derive(Clone)]
pub struct HttpTranscriber {
    client: Arc<Client>,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpTranscriber {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Arc::new(Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: DEFAULT_STT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(&config.voice.stt_base_url, crate::security::get_api_key().ok())
            .with_model(&config.voice.stt_model)
    }

    /// Read and transcribe an audio file
    pub async fn transcribe_file(&self, path: &Path, language: &str) -> Result<String> {
        let audio = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read audio file {}", path.display()))?;
        let file_name = path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());
        self.transcribe(audio, &file_name, language).await
    }
}

/// ISO-639-1 part of a language tag ("cs-CZ" → "cs")
fn primary_language(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}

/// Normalize a transcription result
fn recognized_or_apology(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        NOT_UNDERSTOOD.to_string()
    } else {
        text.to_string()
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str, language: &str) -> Result<String> {
        info!("Transcribing {} bytes of audio ({})", audio.len(), language);

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("language", primary_language(language).to_string())
            .part("file", part);

        let mut req_builder = self.client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", key));
        }
        let response = req_builder
            .send()
            .await
            .context("Failed to send transcription request")?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            debug!("Transcription service rejected the audio");
            return Ok(NOT_UNDERSTOOD.to_string());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Could not request results from the transcription service ({}): {}", status, body);
        }

        let result: TranscriptionResponse = response.json()
            .await
            .context("Failed to parse transcription response")?;
        Ok(recognized_or_apology(&result.text))
    }
}
