//! Reasoning chain controller
//!
//! A pull-based state machine over a [`StepGenerator`]. Each call to
//! [`ReasoningChain::advance`] performs one model call and yields the
//! resulting step, so callers can render progress between steps.
//!
//! ```text
//! Stepping ──continue──▶ Stepping
//!    │  └──reflect / every 3rd step──▶ Reflecting ──▶ (next step)
//!    └──final_answer / max_steps──▶ Finalizing ──▶ Done
//! ```

use anyhow::{Result, Context, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::agent::llm::{ChatMessage, ContentPart};
use crate::agent::retry::{retry_with_fallback, RetryPolicy};
use crate::reasoning::prompts::{CONTINUE_PROMPT, FINAL_PROMPT, REFLECT_PROMPT, SYSTEM_PROMPT};
use crate::reasoning::step::{NextAction, ReasoningStep, StepGenerator, StepResponse};

/// Where the chain is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Stepping,
    /// The next step answers a self-reflection prompt
    Reflecting,
    Finalizing,
    Done,
}

/// Limits of one chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSettings {
    pub max_steps: u32,
    /// Token budget per step
    pub max_tokens: u32,
    /// Token budget of the final answer
    pub final_max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            max_steps: 4,
            max_tokens: 900,
            final_max_tokens: 750,
            retry: RetryPolicy::fixed(3, Duration::from_secs(1)),
        }
    }
}

impl ChainSettings {
    pub fn from_config(config: &crate::config::Config) -> Self {
        let reasoning = &config.reasoning;
        Self {
            max_steps: reasoning.max_steps.max(1),
            max_tokens: reasoning.max_tokens,
            final_max_tokens: reasoning.final_max_tokens,
            retry: RetryPolicy::fixed(reasoning.max_attempts, Duration::from_millis(reasoning.backoff_ms)),
        }
    }
}

/// Progress reported by [`ReasoningChain::advance`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChainUpdate {
    Step { number: u32, step: ReasoningStep },
    Final { step: ReasoningStep, total_thinking_time: Duration },
}

impl ChainUpdate {
    pub fn step(&self) -> &ReasoningStep {
        match self {
            ChainUpdate::Step { step, .. } | ChainUpdate::Final { step, .. } => step,
        }
    }

    /// Heading shown for the step
    pub fn heading(&self) -> String {
        match self {
            ChainUpdate::Step { number, step } => format!("Step {}: {}", number, step.title),
            ChainUpdate::Final { .. } => "Final Answer".to_string(),
        }
    }
}

/// One reasoning session
pub struct ReasoningChain {
    generator: Arc<dyn StepGenerator>,
    settings: ChainSettings,
    history: Vec<ChatMessage>,
    step_count: u32,
    total_thinking_time: Duration,
    state: ChainState,
}

impl ReasoningChain {
    /// Start a chain whose history begins with `opening`
    pub fn new(generator: Arc<dyn StepGenerator>, settings: ChainSettings, opening: ChatMessage) -> Self {
        Self {
            generator,
            settings,
            history: vec![opening],
            step_count: 1,
            total_thinking_time: Duration::ZERO,
            state: ChainState::Stepping,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn total_thinking_time(&self) -> Duration {
        self.total_thinking_time
    }

    /// Perform the next model call; `None` once the final answer was produced
    pub async fn advance(&mut self) -> Option<ChainUpdate> {
        match self.state {
            ChainState::Done => None,
            ChainState::Stepping | ChainState::Reflecting => {
                let (response, elapsed) = self.call(self.settings.max_tokens, false).await;
                self.total_thinking_time += elapsed;
                self.record(&response);

                let number = self.step_count;
                let step = ReasoningStep::from_response(response, elapsed.as_secs_f64());
                self.transition(step.next_action);
                debug!("Step {} done, chain is now {:?}", number, self.state);
                Some(ChainUpdate::Step { number, step })
            }
            ChainState::Finalizing => {
                self.history.push(ChatMessage::user(FINAL_PROMPT));
                let (response, elapsed) = self.call(self.settings.final_max_tokens, true).await;
                self.total_thinking_time += elapsed;
                self.state = ChainState::Done;
                info!("Reasoning finished after {:.2}s", self.total_thinking_time.as_secs_f64());
                Some(ChainUpdate::Final {
                    step: ReasoningStep::from_response(response, elapsed.as_secs_f64()),
                    total_thinking_time: self.total_thinking_time,
                })
            }
        }
    }

    /// Drive the chain to completion, reporting every update
    pub async fn run<F>(mut self, mut on_update: F) -> Vec<ChainUpdate>
    where
        F: FnMut(&ChainUpdate),
    {
        let mut updates = Vec::new();
        while let Some(update) = self.advance().await {
            on_update(&update);
            updates.push(update);
        }
        updates
    }

    async fn call(&self, max_tokens: u32, is_final: bool) -> (StepResponse, Duration) {
        let generator = &self.generator;
        let history = &self.history;
        let attempts = self.settings.retry.attempts();
        let started = Instant::now();

        let response = retry_with_fallback(
            &self.settings.retry,
            move |_attempt| generator.generate_step(SYSTEM_PROMPT, history, max_tokens),
            |e| StepResponse::degraded(is_final, attempts, &format!("{:#}", e)),
        )
        .await;
        (response, started.elapsed())
    }

    fn record(&mut self, response: &StepResponse) {
        let serialized = serde_json::to_string(response).unwrap_or_else(|_| response.content.clone());
        self.history.push(ChatMessage::assistant(serialized));
    }

    fn transition(&mut self, next_action: NextAction) {
        if next_action == NextAction::FinalAnswer || self.step_count >= self.settings.max_steps {
            self.state = ChainState::Finalizing;
        } else if next_action == NextAction::Reflect || self.step_count % 3 == 0 {
            self.history.push(ChatMessage::user(REFLECT_PROMPT));
            self.state = ChainState::Reflecting;
            self.step_count += 1;
        } else {
            self.history.push(ChatMessage::user(CONTINUE_PROMPT));
            self.state = ChainState::Stepping;
            self.step_count += 1;
        }
    }
}

/// Media type for image attachments, by file extension
fn image_media_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// First user message of a chain: the prompt plus attached files.
///
/// Images become base64 image parts; UTF-8 text files are inlined as text.
pub fn opening_message(prompt: &str, attachments: &[PathBuf]) -> Result<ChatMessage> {
    let mut parts = vec![ContentPart::text(prompt)];

    for path in attachments {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read attachment {}", path.display()))?;
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

        if let Some(media_type) = image_media_type(path) {
            parts.push(ContentPart::image_base64(&BASE64.encode(&bytes), media_type));
        } else {
            match String::from_utf8(bytes) {
                Ok(text) => parts.push(ContentPart::text(format!("\n\nAttached file {}:\n{}", name, text))),
                Err(_) => bail!("Unsupported attachment {}: not an image or text file", path.display()),
            }
        }
    }

    Ok(ChatMessage::user_multimodal(parts))
}
