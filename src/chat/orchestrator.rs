//! Stream orchestrator
//!
//! Drives one assistant turn: opens the agent stream, folds every event into
//! the transcript, speaks message text sentence by sentence, and hands the
//! finished transcript to persistence.
//!
//! Everything happens in sequence on the caller's task. Audio for one unit is
//! synthesized and played to completion before the next event is read, so
//! playback never overlaps. Each suspension point also waits on the turn's
//! [`CancellationToken`].

use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::conversation::prompt_with_memory;
use crate::agent::interpreter::{AgentRequest, AgentStream};
use crate::agent::llm::ChatMessage;
use crate::chat::formatter::Transcript;
use crate::memory::ChatStore;
use crate::session::SessionContext;
use crate::types::{Message, Role};
use crate::voice::playback::AudioPlayer;
use crate::voice::segmenter::{SpeechSegmenter, SpeechUnit};
use crate::voice::tts::Synthesizer;

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Cancelled,
}

/// Result of a finished (or cancelled) turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// Final markdown with every fence closed
    pub transcript: String,
    /// Units synthesized and played
    pub spoken_units: usize,
    /// Units whose synthesis or playback failed
    pub skipped_units: usize,
}

/// Turn failures
#[derive(Debug, Error)]
pub enum TurnError {
    /// The agent stream failed; `partial` is what was rendered so far
    #[error("agent stream failed: {source:#}")]
    Agent {
        partial: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to persist turn: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

/// Speech output: synthesis plus a player
#[derive(Clone)]
pub struct VoiceOutput {
    pub synthesizer: Synthesizer,
    pub player: Arc<dyn AudioPlayer>,
}

#[derive(Debug, Default)]
struct SpeechStats {
    spoken: usize,
    skipped: usize,
}

enum Next<T> {
    Item(T),
    Cancelled,
}

/// Orchestrates agent turns against the configured capabilities
#[derive(Clone)]
pub struct StreamOrchestrator {
    agent: Arc<dyn AgentStream>,
    store: Arc<dyn ChatStore>,
    voice: Option<VoiceOutput>,
}

impl StreamOrchestrator {
    pub fn new(agent: Arc<dyn AgentStream>, store: Arc<dyn ChatStore>) -> Self {
        Self { agent, store, voice: None }
    }

    pub fn with_voice(mut self, voice: VoiceOutput) -> Self {
        self.voice = Some(voice);
        self
    }

    /// Run one turn for `prompt`.
    ///
    /// `on_render` receives the full transcript after every event and once
    /// more with the finished text.
    pub async fn run_turn<F>(
        &self,
        session: &mut SessionContext,
        prompt: &str,
        cancel: &CancellationToken,
        mut on_render: F,
    ) -> Result<TurnOutcome, TurnError>
    where
        F: FnMut(&str),
    {
        session.messages.push(Message::user(prompt));
        self.store
            .save_chat(&session.conversation_id, Role::User, prompt)
            .await
            .map_err(TurnError::Persistence)?;

        let agent_prompt = prompt_with_memory(prompt, &session.messages, session.settings.recall_pairs);
        let request = AgentRequest {
            conversation_id: session.conversation_id.clone(),
            messages: vec![ChatMessage::user(&agent_prompt)],
            instructions: session.settings.instructions(),
            stream: true,
        };

        let mut transcript = Transcript::new();
        let mut segmenter = SpeechSegmenter::new();
        let mut stats = SpeechStats::default();
        let voice = self.voice.as_ref().filter(|_| session.settings.voice_enabled);
        let language = session.settings.language.clone();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Next::Cancelled,
            opened = self.agent.open(request) => Next::Item(opened),
        };
        let mut events = match opened {
            Next::Cancelled => {
                info!("Turn cancelled before the agent responded");
                return self.finish_turn(session, &agent_prompt, transcript, TurnStatus::Cancelled, stats, on_render).await;
            }
            Next::Item(Ok(events)) => events,
            Next::Item(Err(e)) => return Err(TurnError::Agent { partial: String::new(), source: e }),
        };

        let mut status = TurnStatus::Completed;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Next::Cancelled,
                next = events.next() => Next::Item(next),
            };
            let event = match next {
                Next::Cancelled => {
                    status = TurnStatus::Cancelled;
                    break;
                }
                Next::Item(None) => break,
                Next::Item(Some(Err(e))) => {
                    warn!("Agent stream failed mid-turn: {:#}", e);
                    return Err(TurnError::Agent { partial: transcript.finish(), source: e });
                }
                Next::Item(Some(Ok(event))) => event,
            };

            transcript.apply(&event);
            on_render(transcript.as_str());

            if let (Some(voice), Some(text)) = (voice, event.speakable_text()) {
                for unit in segmenter.feed(text) {
                    if !self.speak(voice, &unit, &language, cancel, &mut stats).await {
                        status = TurnStatus::Cancelled;
                        break;
                    }
                }
                if status == TurnStatus::Cancelled {
                    break;
                }
            }
        }

        if status == TurnStatus::Completed {
            if let (Some(voice), Some(unit)) = (voice, segmenter.finish()) {
                if !self.speak(voice, &unit, &language, cancel, &mut stats).await {
                    status = TurnStatus::Cancelled;
                }
            }
        }

        self.finish_turn(session, &agent_prompt, transcript, status, stats, on_render).await
    }

    /// Synthesize and play one unit. Returns `false` once the turn is cancelled.
    async fn speak(
        &self,
        voice: &VoiceOutput,
        unit: &SpeechUnit,
        language: &str,
        cancel: &CancellationToken,
        stats: &mut SpeechStats,
    ) -> bool {
        let synthesized = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            clip = voice.synthesizer.synthesize(unit.text(), language) => clip,
        };
        let clip = match synthesized {
            Ok(clip) => clip,
            Err(e) => {
                debug!("Skipping audio for unit: {}", e);
                stats.skipped += 1;
                return !cancel.is_cancelled();
            }
        };

        match voice.player.play(&clip, cancel).await {
            Ok(()) => stats.spoken += 1,
            Err(e) => {
                warn!("Audio playback failed: {:#}", e);
                stats.skipped += 1;
            }
        }
        !cancel.is_cancelled()
    }

    async fn finish_turn<F>(
        &self,
        session: &mut SessionContext,
        agent_prompt: &str,
        transcript: Transcript,
        status: TurnStatus,
        stats: SpeechStats,
        mut on_render: F,
    ) -> Result<TurnOutcome, TurnError>
    where
        F: FnMut(&str),
    {
        let text = transcript.finish();
        on_render(&text);

        session.messages.push(Message::assistant(&text));
        session.agent_history.push(ChatMessage::user(agent_prompt));
        session.agent_history.push(ChatMessage::assistant(&text));

        self.store
            .save_chat(&session.conversation_id, Role::Assistant, &text)
            .await
            .map_err(TurnError::Persistence)?;
        self.store
            .save_agent_history(&session.conversation_id, &session.agent_history)
            .await
            .map_err(TurnError::Persistence)?;

        info!(
            "Turn {:?}: {} chars, {} units spoken, {} skipped",
            status, text.len(), stats.spoken, stats.skipped
        );
        Ok(TurnOutcome {
            status,
            transcript: text,
            spoken_units: stats.spoken,
            skipped_units: stats.skipped,
        })
    }
}
