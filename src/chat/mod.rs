//! Streamed chat turns
//!
//! - `formatter`: folds agent events into a markdown transcript
//! - `images`: data-URI embedding for generated images
//! - `orchestrator`: runs a turn end to end, with optional speech

pub mod formatter;
pub mod images;
pub mod orchestrator;

pub use formatter::Transcript;
pub use orchestrator::{StreamOrchestrator, TurnError, TurnOutcome, TurnStatus, VoiceOutput};
