//! Agent stream events
//!
//! The code-execution agent emits loosely-typed JSON records
//! (`{"type": "console", "format": "output", "content": "...", "start": true}`).
//! They are decoded here into [`StreamEvent`], a closed sum type with one
//! variant per kind so the formatter can match exhaustively.

use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// Position of an event inside its block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Middle,
    End,
}

/// Console payload, keyed by the record's `format`
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleOutput {
    /// Text printed by the executed code
    Output(String),
    /// Currently executing line marker; `None` or empty means nothing ran
    ActiveLine(Option<String>),
    /// Any other console format; ignored by the formatter
    Other(String),
}

/// Image payload, keyed by the record's `format`
#[derive(Debug, Clone, PartialEq)]
pub enum ImagePayload {
    Base64Png(String),
    Path(PathBuf),
    Unsupported(String),
}

/// One unit of agent output
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Message {
        phase: Phase,
        content: String,
        token_limit_reached: bool,
    },
    Code {
        phase: Phase,
        content: String,
    },
    Confirmation {
        phase: Phase,
        code: String,
    },
    Console {
        phase: Phase,
        output: ConsoleOutput,
    },
    Image {
        phase: Phase,
        payload: ImagePayload,
    },
}

impl StreamEvent {
    pub fn phase(&self) -> Phase {
        match self {
            StreamEvent::Message { phase, .. }
            | StreamEvent::Code { phase, .. }
            | StreamEvent::Confirmation { phase, .. }
            | StreamEvent::Console { phase, .. }
            | StreamEvent::Image { phase, .. } => *phase,
        }
    }

    /// Message text in the middle phase, the only speakable kind
    pub fn speakable_text(&self) -> Option<&str> {
        match self {
            StreamEvent::Message { phase: Phase::Middle, content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn message(phase: Phase, content: impl Into<String>) -> Self {
        StreamEvent::Message {
            phase,
            content: content.into(),
            token_limit_reached: false,
        }
    }

    pub fn code(phase: Phase, content: impl Into<String>) -> Self {
        StreamEvent::Code { phase, content: content.into() }
    }
}

/// Raw record as produced by the agent
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawChunk {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub start: bool,
    #[serde(default)]
    pub end: bool,
    #[serde(default)]
    pub token_limit_reached: bool,
}

impl RawChunk {
    /// Parse one JSON record
    pub fn parse(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    fn text_content(&self) -> Option<String> {
        match &self.content {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }

    fn has_content(&self) -> bool {
        match &self.content {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    /// Expand the record into Start / Middle / End events.
    ///
    /// A record with neither flag is always a middle event. A flagged record
    /// only yields a middle event when it also carries content. Unknown kinds
    /// yield nothing.
    pub fn into_events(self) -> Vec<StreamEvent> {
        let mut phases = Vec::with_capacity(3);
        if self.start {
            phases.push(Phase::Start);
        }
        if (!self.start && !self.end) || self.has_content() {
            phases.push(Phase::Middle);
        }
        if self.end {
            phases.push(Phase::End);
        }

        phases
            .into_iter()
            .filter_map(|phase| self.event_for(phase))
            .collect()
    }

    fn event_for(&self, phase: Phase) -> Option<StreamEvent> {
        let middle = phase == Phase::Middle;
        let event = match self.kind.as_str() {
            "message" => StreamEvent::Message {
                phase,
                content: if middle { self.text_content().unwrap_or_default() } else { String::new() },
                token_limit_reached: self.token_limit_reached,
            },
            "code" => StreamEvent::Code {
                phase,
                content: if middle { self.text_content().unwrap_or_default() } else { String::new() },
            },
            "confirmation" => StreamEvent::Confirmation {
                phase,
                code: if middle {
                    self.content
                        .as_ref()
                        .and_then(|c| c.get("code"))
                        .and_then(|c| c.as_str())
                        .unwrap_or_default()
                        .to_string()
                } else {
                    String::new()
                },
            },
            "console" => StreamEvent::Console {
                phase,
                output: match self.format.as_deref().unwrap_or_default() {
                    "output" => ConsoleOutput::Output(self.text_content().unwrap_or_default()),
                    "active_line" => ConsoleOutput::ActiveLine(self.text_content()),
                    other => ConsoleOutput::Other(other.to_string()),
                },
            },
            "image" => StreamEvent::Image {
                phase,
                payload: match self.format.as_deref().unwrap_or_default() {
                    "base64.png" => ImagePayload::Base64Png(self.text_content().unwrap_or_default()),
                    "path" => ImagePayload::Path(PathBuf::from(self.text_content().unwrap_or_default())),
                    other => ImagePayload::Unsupported(other.to_string()),
                },
            },
            _ => return None,
        };
        Some(event)
    }
}

/// Decode one JSON record into events; malformed records yield nothing
pub fn decode_record(data: &str) -> Vec<StreamEvent> {
    match RawChunk::parse(data) {
        Ok(chunk) => chunk.into_events(),
        Err(e) => {
            tracing::debug!("Skipping undecodable agent record: {}", e);
            Vec::new()
        }
    }
}
