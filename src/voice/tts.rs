//! Text-to-Speech (TTS) Module
//!
//! Maps a language tag to a voice and synthesizes speech units into audio
//! clips through a pluggable [`SpeechEngine`].
//!
//! # Architecture
//!
//! ```text
//! SpeechUnit → Synthesizer → SpeechEngine (HTTP) → AudioClip → AudioPlayer
//!                  ↓
//!            (voice table, bounded retry)
//! ```

use anyhow::{Result, Context, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Serialize, Deserialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::agent::retry::{retry, RetryPolicy};
use crate::voice::playback::{AudioClip, AudioFormat};

/// Engine quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceTier {
    Neural,
    Standard,
}

impl VoiceTier {
    /// TTS model used for this tier on OpenAI-compatible engines
    pub fn model(&self) -> &'static str {
        match self {
            VoiceTier::Neural => "tts-1-hd",
            VoiceTier::Standard => "tts-1",
        }
    }
}

/// Voice chosen for a language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceProfile {
    pub voice: &'static str,
    pub tier: VoiceTier,
}

const VOICES: &[(&str, &str, VoiceTier)] = &[
    ("en-US", "Amy", VoiceTier::Neural),
    ("cs-CZ", "Jitka", VoiceTier::Neural),
    ("sk-SK", "Jitka", VoiceTier::Neural),
    ("ro-RO", "Carmen", VoiceTier::Standard),
    ("de-DE", "Vicki", VoiceTier::Neural),
    ("fr-FR", "Lea", VoiceTier::Neural),
    ("en-IN", "Kajal", VoiceTier::Neural),
];

/// Language tags with a dedicated voice
pub fn supported_languages() -> impl Iterator<Item = &'static str> {
    VOICES.iter().map(|(tag, _, _)| *tag)
}

/// Look up the voice for a language tag, falling back to Amy (standard)
pub fn voice_for_language(language: &str) -> VoiceProfile {
    VOICES.iter()
        .find(|(tag, _, _)| tag.eq_ignore_ascii_case(language))
        .map(|(_, voice, tier)| VoiceProfile { voice, tier: *tier })
        .unwrap_or(VoiceProfile { voice: "Amy", tier: VoiceTier::Standard })
}

/// Speech engine capability: text in, encoded audio bytes out
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn speak(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>>;

    /// Encoding of the bytes returned by [`SpeechEngine::speak`]
    fn format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }
}

/// Synthesis failed; the caller skips this unit's audio
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("nothing to synthesize")]
    EmptyText,
    #[error("speech engine failed for {language} after {attempts} attempt(s): {source}")]
    Engine {
        language: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

/// Language-aware synthesizer on top of a [`SpeechEngine`]
#[derive(Clone)]
pub struct Synthesizer {
    engine: Arc<dyn SpeechEngine>,
    policy: RetryPolicy,
}

impl Synthesizer {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self { engine, policy: RetryPolicy::once() }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Synthesize one unit of text in the given language
    pub async fn synthesize(&self, text: &str, language: &str) -> Result<AudioClip, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let profile = voice_for_language(language);
        debug!("Synthesizing {} chars with voice {} ({:?})", text.len(), profile.voice, profile.tier);

        let engine = &self.engine;
        let voice = &profile;
        let result = retry(&self.policy, move |_attempt| engine.speak(text, voice)).await;
        match result {
            Ok(bytes) => Ok(AudioClip::new(bytes, self.engine.format())),
            Err(e) => {
                warn!("Speech synthesis failed for {}: {:#}", language, e);
                Err(SynthesisError::Engine {
                    language: language.to_string(),
                    attempts: self.policy.attempts(),
                    source: e,
                })
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: String,
    response_format: &'a str,
}

/// OpenAI-compatible `/audio/speech` client
#[derive(Clone)]
pub struct HttpSpeechEngine {
    client: Arc<Client>,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSpeechEngine {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Arc::new(Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(&config.voice.tts_base_url, crate::security::get_api_key().ok())
    }
}

#[async_trait]
impl SpeechEngine for HttpSpeechEngine {
    async fn speak(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>> {
        let request = SpeechRequest {
            model: profile.tier.model(),
            input: text,
            voice: profile.voice.to_lowercase(),
            response_format: "mp3",
        };

        let mut req_builder = self.client.post(format!("{}/audio/speech", self.base_url));
        if let Some(key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", key));
        }
        let response = req_builder
            .json(&request)
            .send()
            .await
            .context("Failed to send speech request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("TTS API error ({}): {}", status, body);
        }

        let bytes = response.bytes().await.context("Failed to read speech audio")?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeEngine {
        fail_first: u32,
        calls: AtomicU32,
        seen: Mutex<Vec<(String, VoiceProfile)>>,
    }

    impl FakeEngine {
        fn new(fail_first: u32) -> Self {
            Self { fail_first, calls: AtomicU32::new(0), seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl SpeechEngine for FakeEngine {
        async fn speak(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((text.to_string(), profile.clone()));
            if n < self.fail_first {
                bail!("engine unavailable");
            }
            Ok(vec![1, 2, 3])
        }
    }

    #[test]
    fn test_voice_table() {
        assert_eq!(voice_for_language("en-US"), VoiceProfile { voice: "Amy", tier: VoiceTier::Neural });
        assert_eq!(voice_for_language("sk-SK").voice, "Jitka");
        assert_eq!(voice_for_language("ro-RO"), VoiceProfile { voice: "Carmen", tier: VoiceTier::Standard });
        assert_eq!(voice_for_language("en-IN").voice, "Kajal");
        assert_eq!(supported_languages().count(), 7);
    }

    #[test]
    fn test_unknown_language_falls_back_to_standard_amy() {
        assert_eq!(voice_for_language("ja-JP"), VoiceProfile { voice: "Amy", tier: VoiceTier::Standard });
        assert_eq!(voice_for_language(""), VoiceProfile { voice: "Amy", tier: VoiceTier::Standard });
    }

    #[test]
    fn test_tier_models() {
        assert_eq!(VoiceTier::Neural.model(), "tts-1-hd");
        assert_eq!(VoiceTier::Standard.model(), "tts-1");
    }

    #[tokio::test]
    async fn test_synthesize_returns_clip() {
        let engine = Arc::new(FakeEngine::new(0));
        let synth = Synthesizer::new(engine.clone());
        let clip = synth.synthesize("Bonjour.", "fr-FR").await.unwrap();
        assert_eq!(clip.bytes(), &[1, 2, 3]);
        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen[0].1.voice, "Lea");
    }

    #[tokio::test]
    async fn test_engine_failure_is_reported_not_panicked() {
        let engine = Arc::new(FakeEngine::new(5));
        let synth = Synthesizer::new(engine.clone());
        let err = synth.synthesize("Hello.", "en-US").await.unwrap_err();
        assert!(matches!(err, SynthesisError::Engine { attempts: 1, .. }));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_policy_recovers_transient_failure() {
        let engine = Arc::new(FakeEngine::new(1));
        let synth = Synthesizer::new(engine.clone())
            .with_policy(RetryPolicy::fixed(2, Duration::ZERO));
        assert!(synth.synthesize("Hello.", "en-US").await.is_ok());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected_without_engine_call() {
        let engine = Arc::new(FakeEngine::new(0));
        let synth = Synthesizer::new(engine.clone());
        assert!(matches!(synth.synthesize("  ", "en-US").await, Err(SynthesisError::EmptyText)));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }
}
