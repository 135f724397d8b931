//! End-to-end chat turns: agent stream → transcript → speech → storage

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use code_chat::agent::{AgentRequest, AgentStream, EventStream, Phase, ReplayAgent, StreamEvent};
use code_chat::chat::{StreamOrchestrator, TurnError, TurnStatus, VoiceOutput};
use code_chat::memory::{ChatStore, SqliteChatStore};
use code_chat::session::{SessionContext, SessionSettings};
use code_chat::types::Role;
use code_chat::voice::{AudioClip, AudioPlayer, SpeechEngine, Synthesizer, VoiceProfile};

/// Returns the text itself as "audio" so playback order can be checked
struct EchoEngine {
    fail_on: Option<&'static str>,
    voices: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechEngine for EchoEngine {
    async fn speak(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>> {
        self.voices.lock().unwrap().push(profile.voice.to_string());
        if self.fail_on.is_some_and(|needle| text.contains(needle)) {
            bail!("engine rejected text");
        }
        Ok(text.as_bytes().to_vec())
    }
}

#[derive(Default)]
struct RecordingPlayer {
    played: Mutex<Vec<String>>,
    cancel_after: Option<usize>,
}

#[async_trait]
impl AudioPlayer for RecordingPlayer {
    async fn play(&self, clip: &AudioClip, cancel: &CancellationToken) -> Result<()> {
        let mut played = self.played.lock().unwrap();
        played.push(String::from_utf8_lossy(clip.bytes()).into_owned());
        if self.cancel_after == Some(played.len()) {
            cancel.cancel();
        }
        Ok(())
    }
}

/// Streams some events, then fails
struct BrokenAgent {
    events: Vec<StreamEvent>,
}

#[async_trait]
impl AgentStream for BrokenAgent {
    async fn open(&self, _request: AgentRequest) -> Result<EventStream> {
        let items = self
            .events
            .clone()
            .into_iter()
            .map(Ok)
            .chain(std::iter::once(Err(anyhow::anyhow!("connection reset"))));
        Ok(stream::iter(items).boxed())
    }
}

/// Fails before streaming anything
struct UnreachableAgent;

#[async_trait]
impl AgentStream for UnreachableAgent {
    async fn open(&self, _request: AgentRequest) -> Result<EventStream> {
        bail!("Interpreter error (503 Service Unavailable)")
    }
}

fn voice_session(language: &str) -> SessionContext {
    let settings = SessionSettings {
        voice_enabled: true,
        language: language.to_string(),
        ..SessionSettings::default()
    };
    SessionContext::new("tester", settings)
}

fn spoken_turn() -> ReplayAgent {
    ReplayAgent::from_lines([
        r#"{"type":"message","start":true}"#,
        r#"{"type":"message","content":"Let me check. "}"#,
        r#"{"type":"message","content":"Here is code:"}"#,
        r#"{"type":"message","content":"```"}"#,
        r#"{"type":"message","content":"python\nx = 1. y = 2! "}"#,
        r#"{"type":"message","content":"```"}"#,
        r#"{"type":"message","content":"All done"}"#,
        r#"{"type":"message","end":true}"#,
        r#"{"type":"code","start":true}"#,
        r#"{"type":"code","content":"print(x)"}"#,
        r#"{"type":"code","end":true}"#,
        r#"{"type":"console","format":"output","content":"1"}"#,
    ])
}

#[tokio::test]
async fn test_spoken_units_follow_message_order_and_skip_code() {
    let engine = Arc::new(EchoEngine { fail_on: None, voices: Mutex::new(Vec::new()) });
    let player = Arc::new(RecordingPlayer::default());
    let store = Arc::new(SqliteChatStore::in_memory().unwrap());
    let orchestrator = StreamOrchestrator::new(Arc::new(spoken_turn()), store.clone()).with_voice(VoiceOutput {
        synthesizer: Synthesizer::new(engine.clone()),
        player: player.clone(),
    });

    let mut session = voice_session("cs-CZ");
    let outcome = orchestrator
        .run_turn(&mut session, "compute x", &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    let played = player.played.lock().unwrap().clone();
    assert_eq!(played, vec!["Let me check.", "Here is code:", "All done"]);
    assert!(played.iter().all(|unit| !unit.contains("x = 1")));
    assert_eq!(outcome.spoken_units, 3);
    assert!(engine.voices.lock().unwrap().iter().all(|v| v == "Jitka"));
    assert!(outcome.transcript.contains("```python\nprint(x)"));
}

#[tokio::test]
async fn test_failed_synthesis_skips_unit_but_keeps_transcript() {
    let engine = Arc::new(EchoEngine { fail_on: Some("code"), voices: Mutex::new(Vec::new()) });
    let player = Arc::new(RecordingPlayer::default());
    let store = Arc::new(SqliteChatStore::in_memory().unwrap());
    let orchestrator = StreamOrchestrator::new(Arc::new(spoken_turn()), store).with_voice(VoiceOutput {
        synthesizer: Synthesizer::new(engine),
        player: player.clone(),
    });

    let mut session = voice_session("en-US");
    let outcome = orchestrator
        .run_turn(&mut session, "compute x", &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.skipped_units, 1);
    assert_eq!(*player.played.lock().unwrap(), vec!["Let me check.", "All done"]);
    assert!(outcome.transcript.starts_with("Let me check."));
}

#[tokio::test]
async fn test_cancel_during_playback_stops_speech_and_persists() {
    let engine = Arc::new(EchoEngine { fail_on: None, voices: Mutex::new(Vec::new()) });
    let player = Arc::new(RecordingPlayer { cancel_after: Some(1), ..RecordingPlayer::default() });
    let store = Arc::new(SqliteChatStore::in_memory().unwrap());
    let orchestrator = StreamOrchestrator::new(Arc::new(spoken_turn()), store.clone()).with_voice(VoiceOutput {
        synthesizer: Synthesizer::new(engine),
        player: player.clone(),
    });

    let mut session = voice_session("en-US");
    let outcome = orchestrator
        .run_turn(&mut session, "compute x", &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Cancelled);
    assert_eq!(player.played.lock().unwrap().len(), 1);
    let chats = store.get_chats_by_conversation_id(&session.conversation_id).await.unwrap();
    assert_eq!(chats.len(), 2);
    assert_eq!(chats[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_voice_disabled_session_is_silent() {
    let engine = Arc::new(EchoEngine { fail_on: None, voices: Mutex::new(Vec::new()) });
    let player = Arc::new(RecordingPlayer::default());
    let store = Arc::new(SqliteChatStore::in_memory().unwrap());
    let orchestrator = StreamOrchestrator::new(Arc::new(spoken_turn()), store).with_voice(VoiceOutput {
        synthesizer: Synthesizer::new(engine.clone()),
        player: player.clone(),
    });

    let mut session = SessionContext::new("tester", SessionSettings::default());
    let outcome = orchestrator
        .run_turn(&mut session, "compute x", &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome.spoken_units, 0);
    assert!(player.played.lock().unwrap().is_empty());
    assert!(engine.voices.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_conversation_resumes_with_recall() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteChatStore::new(dir.path().join("chats.db")).await.unwrap());
    let agent = Arc::new(ReplayAgent::from_lines([r#"{"type":"message","content":"Four."}"#]));
    let orchestrator = StreamOrchestrator::new(agent, store.clone());

    let mut session = SessionContext::start(store.as_ref(), "tester", SessionSettings::default(), "What is 2 + 2?")
        .await
        .unwrap();
    orchestrator
        .run_turn(&mut session, "What is 2 + 2?", &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    let listed = store.list_conversations("tester", 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title.as_deref(), Some("What is 2 + 2?"));

    let resumed = SessionContext::resume(store.as_ref(), &session.conversation_id, "tester", SessionSettings::default())
        .await
        .unwrap();
    assert_eq!(resumed.messages.len(), 2);
    assert_eq!(resumed.messages[1].content, "Four.");
    assert_eq!(resumed.agent_history.len(), 2);
}

#[tokio::test]
async fn test_stream_error_returns_partial_and_persists_only_prompt() {
    let agent = BrokenAgent {
        events: vec![
            StreamEvent::message(Phase::Start, ""),
            StreamEvent::message(Phase::Middle, "Running it."),
            StreamEvent::message(Phase::End, ""),
            StreamEvent::code(Phase::Start, ""),
            StreamEvent::code(Phase::Middle, "print(1)"),
        ],
    };
    let store = Arc::new(SqliteChatStore::in_memory().unwrap());
    let orchestrator = StreamOrchestrator::new(Arc::new(agent), store.clone());

    let mut session = SessionContext::new("tester", SessionSettings::default());
    let result = orchestrator
        .run_turn(&mut session, "run it", &CancellationToken::new(), |_| {})
        .await;

    match result {
        Err(TurnError::Agent { partial, source }) => {
            assert_eq!(partial, "Running it.\n```python\nprint(1)\n```\n");
            assert!(format!("{:#}", source).contains("connection reset"));
        }
        other => panic!("expected agent error, got {:?}", other.map(|o| o.status)),
    }

    let chats = store.get_chats_by_conversation_id(&session.conversation_id).await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].role, Role::User);
    assert!(store.load_agent_history(&session.conversation_id).await.unwrap().is_empty());
    assert!(session.agent_history.is_empty());
}

#[tokio::test]
async fn test_open_failure_is_an_agent_error_with_empty_partial() {
    let store = Arc::new(SqliteChatStore::in_memory().unwrap());
    let orchestrator = StreamOrchestrator::new(Arc::new(UnreachableAgent), store.clone());

    let mut session = SessionContext::new("tester", SessionSettings::default());
    let result = orchestrator
        .run_turn(&mut session, "hello", &CancellationToken::new(), |_| {})
        .await;

    assert!(matches!(result, Err(TurnError::Agent { ref partial, .. }) if partial.is_empty()));
    let chats = store.get_chats_by_conversation_id(&session.conversation_id).await.unwrap();
    assert_eq!(chats.len(), 1);
    assert!(store.load_agent_history(&session.conversation_id).await.unwrap().is_empty());
}
