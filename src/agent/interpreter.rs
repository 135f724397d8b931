//! Code-execution agent stream
//!
//! The agent (an interpreter server running an LLM that writes and executes
//! code) is consumed as an opaque producer of [`StreamEvent`]s.
//!
//! # Wire format
//!
//! `POST <base_url>/chat` with an [`AgentRequest`] body. The response body is a
//! stream of JSON records, either as SSE (`data: {...}` lines separated by a
//! blank line, terminated by `data: [DONE]`) or as newline-delimited JSON.

use anyhow::{Result, Context, bail};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::events::{decode_record, StreamEvent};
use crate::agent::llm::ChatMessage;
use crate::agent::prompts::{self, ExecutionMode};

/// Events of one turn, in emission order
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Instructions that shape how the agent behaves for one turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterpreterInstructions {
    pub auto_run: bool,
    pub system_message: String,
    pub custom_instructions: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the agent to emit images it produces
    pub emit_images: bool,
}

impl InterpreterInstructions {
    pub fn new(
        mode: ExecutionMode,
        language: &str,
        user_instructions: &str,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            auto_run: mode.auto_run(),
            system_message: prompts::system_message(mode, language),
            custom_instructions: prompts::custom_instructions(mode, language, user_instructions),
            model: model.into(),
            temperature,
            max_tokens,
            emit_images: true,
        }
    }
}

/// One turn's request to the agent
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    /// Conversation id, used by the agent to keep its own history file
    pub conversation_id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub instructions: InterpreterInstructions,
    pub stream: bool,
}

/// Agent stream capability
#[async_trait]
pub trait AgentStream: Send + Sync {
    /// Start a turn and return its event stream
    async fn open(&self, request: AgentRequest) -> Result<EventStream>;
}

/// Incremental decoder for SSE or NDJSON bodies
///
/// Bytes are buffered until a full line arrives, so a UTF-8 character split
/// across network chunks is decoded intact.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once a `[DONE]` sentinel was seen
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed raw body bytes, returning every event completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.extend(self.decode_bytes(&line));
        }
        events
    }

    /// Decode whatever is left once the body ends
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.decode_bytes(&rest)
    }

    fn decode_bytes(&mut self, line: &[u8]) -> Vec<StreamEvent> {
        match std::str::from_utf8(line) {
            Ok(text) => self.decode_line(text),
            Err(e) => {
                warn!("Dropping agent record with invalid UTF-8: {}", e);
                Vec::new()
            }
        }
    }

    fn decode_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') || self.finished {
            return Vec::new();
        }
        // SSE framing: only data lines carry records
        let data = match line.strip_prefix("data:") {
            Some(data) => data.trim_start(),
            None if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") => {
                return Vec::new();
            }
            None => line,
        };
        if data == "[DONE]" {
            self.finished = true;
            return Vec::new();
        }
        decode_record(data)
    }
}

/// HTTP client for an interpreter server
#[derive(Clone)]
pub struct HttpInterpreter {
    client: Arc<Client>,
    base_url: String,
    api_key: Option<String>,
}

impl HttpInterpreter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Arc::new(Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(&config.interpreter.base_url, crate::security::get_api_key().ok())
    }
}

struct BodyState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: RecordDecoder,
    pending: VecDeque<StreamEvent>,
    done: bool,
}

#[async_trait]
impl AgentStream for HttpInterpreter {
    async fn open(&self, request: AgentRequest) -> Result<EventStream> {
        info!("Opening agent stream for conversation {}", request.conversation_id);

        let mut req_builder = self.client
            .post(format!("{}/chat", self.base_url))
            .header("Accept", "text/event-stream");
        if let Some(key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", key));
        }
        let response = req_builder
            .json(&request)
            .send()
            .await
            .context("Failed to send request to interpreter")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Interpreter error ({}): {}", status, body);
        }

        let state = BodyState {
            body: response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed(),
            decoder: RecordDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let events = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(event) = st.pending.pop_front() {
                    return Some((Ok(event), st));
                }
                if st.done {
                    return None;
                }
                match st.body.next().await {
                    Some(Ok(bytes)) => {
                        st.pending.extend(st.decoder.push(&bytes));
                        if st.decoder.is_finished() {
                            st.done = true;
                        }
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        let err = anyhow::Error::new(e).context("Failed to read interpreter stream");
                        return Some((Err(err), st));
                    }
                    None => {
                        st.pending.extend(st.decoder.finish());
                        st.done = true;
                    }
                }
            }
        });

        Ok(events.boxed())
    }
}

/// Replays recorded agent output from a JSON-lines file
#[derive(Debug, Clone)]
pub struct ReplayAgent {
    records: Vec<String>,
}

impl ReplayAgent {
    pub fn from_lines(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { records: lines.into_iter().map(Into::into).collect() }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        Ok(Self::from_lines(contents.lines().filter(|l| !l.trim().is_empty())))
    }
}

#[async_trait]
impl AgentStream for ReplayAgent {
    async fn open(&self, request: AgentRequest) -> Result<EventStream> {
        debug!("Replaying {} records for {}", self.records.len(), request.conversation_id);
        let mut decoder = RecordDecoder::new();
        let mut events = Vec::new();
        for record in &self.records {
            events.extend(decoder.push(record.as_bytes()));
            events.extend(decoder.push(b"\n"));
        }
        events.extend(decoder.finish());
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::Phase;

    #[test]
    fn test_decoder_handles_sse_split_across_chunks() {
        let mut decoder = RecordDecoder::new();
        let first = decoder.push(b"data: {\"type\":\"message\",\"con");
        assert!(first.is_empty());
        let second = decoder.push(b"tent\":\"Hi\"}\n\ndata: [DONE]\n\n");
        assert_eq!(second, vec![StreamEvent::message(Phase::Middle, "Hi")]);
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_decoder_keeps_multibyte_char_split_across_chunks() {
        let record = "data: {\"type\":\"message\",\"content\":\"Dobrý den\"}\n\n".as_bytes();
        let split = record.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = RecordDecoder::new();
        assert!(decoder.push(&record[..split]).is_empty());
        let events = decoder.push(&record[split..]);
        assert_eq!(events, vec![StreamEvent::message(Phase::Middle, "Dobrý den")]);
    }

    #[test]
    fn test_decoder_drops_invalid_utf8_line_only() {
        let mut decoder = RecordDecoder::new();
        let mut body = b"{\"type\":\"message\",\"content\":\"\xFF\"}\n".to_vec();
        body.extend_from_slice(b"{\"type\":\"message\",\"content\":\"ok\"}\n");
        assert_eq!(decoder.push(&body), vec![StreamEvent::message(Phase::Middle, "ok")]);
    }

    #[test]
    fn test_decoder_handles_ndjson_and_trailing_record() {
        let mut decoder = RecordDecoder::new();
        let events = decoder.push(b"{\"type\":\"code\",\"start\":true}\n{\"type\":\"code\",\"content\":\"x\"}");
        assert_eq!(events, vec![StreamEvent::code(Phase::Start, "")]);
        assert_eq!(decoder.finish(), vec![StreamEvent::code(Phase::Middle, "x")]);
    }

    #[test]
    fn test_decoder_ignores_sse_metadata_and_after_done() {
        let mut decoder = RecordDecoder::new();
        let events = decoder.push(b": keepalive\nevent: chunk\ndata: [DONE]\ndata: {\"type\":\"message\",\"content\":\"late\"}\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_instructions_follow_mode() {
        let run = InterpreterInstructions::new(ExecutionMode::AutoRun, "en-US", "", "gpt-4o", 0.1, 1024);
        assert!(run.auto_run);
        let confirm = InterpreterInstructions::new(ExecutionMode::Confirm, "en-US", "", "claude", 0.3, 2048);
        assert!(!confirm.auto_run);
        assert_eq!(confirm.model, "claude");
        assert_eq!(confirm.max_tokens, 2048);
    }

    #[tokio::test]
    async fn test_replay_agent_streams_records_in_order() {
        let agent = ReplayAgent::from_lines([
            r#"{"type":"message","start":true}"#,
            r#"{"type":"message","content":"Hello"}"#,
            r#"{"type":"message","end":true}"#,
        ]);
        let request = AgentRequest {
            conversation_id: "c1".into(),
            messages: vec![ChatMessage::user("hi")],
            instructions: InterpreterInstructions::new(ExecutionMode::Confirm, "en-US", "", "gpt-4o", 0.1, 1024),
            stream: true,
        };
        let events: Vec<StreamEvent> = agent.open(request).await.unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        let phases: Vec<Phase> = events.iter().map(|e| e.phase()).collect();
        assert_eq!(phases, vec![Phase::Start, Phase::Middle, Phase::End]);
    }
}
