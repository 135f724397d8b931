//! Code Chat - Voice Module
//!
//! Spoken replies and spoken prompts:
//! - `segmenter`: splits streamed message text into speakable sentences
//! - `tts`: language-aware speech synthesis
//! - `playback`: sequential, cancellable audio output
//! - `stt`: transcription of recorded prompts

pub mod playback;
pub mod segmenter;
pub mod stt;
pub mod tts;

pub use playback::{AudioClip, AudioFormat, AudioPlayer, PacedPlayer};
#[cfg(feature = "voice")]
pub use playback::RodioPlayer;
pub use segmenter::{SpeechSegmenter, SpeechUnit};
pub use stt::{HttpTranscriber, Transcriber};
pub use tts::{HttpSpeechEngine, SpeechEngine, SynthesisError, Synthesizer, VoiceProfile, VoiceTier};
