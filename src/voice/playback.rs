//! Audio playback
//!
//! Clips are played strictly one after another; the orchestrator awaits each
//! [`AudioPlayer::play`] before synthesizing the next unit. Every player
//! returns early once the turn's cancellation token fires.

use anyhow::{Result, Context};
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use std::io::Cursor;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default pacing: wait 1000/950 of the clip's length
pub const DEFAULT_PACING: f64 = 1000.0 / 950.0;

/// Bitrate assumed when estimating MP3 length
pub const DEFAULT_MP3_BITRATE_KBPS: u32 = 48;

/// Encoding of a clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
}

/// Encoded audio for one speech unit
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    bytes: Vec<u8>,
    format: AudioFormat,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, format: AudioFormat) -> Self {
        Self { bytes, format }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Playback length. Exact for WAV; estimated from `mp3_bitrate_kbps` for MP3.
    pub fn duration(&self, mp3_bitrate_kbps: u32) -> Result<Duration> {
        match self.format {
            AudioFormat::Wav => {
                let reader = hound::WavReader::new(Cursor::new(&self.bytes))
                    .context("Failed to parse WAV clip")?;
                let rate = reader.spec().sample_rate.max(1) as f64;
                Ok(Duration::from_secs_f64(reader.duration() as f64 / rate))
            }
            AudioFormat::Mp3 => {
                let bits_per_sec = mp3_bitrate_kbps.max(1) as f64 * 1000.0;
                Ok(Duration::from_secs_f64(self.bytes.len() as f64 * 8.0 / bits_per_sec))
            }
        }
    }
}

/// Audio output capability
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Play a clip to completion, or until `cancel` fires
    async fn play(&self, clip: &AudioClip, cancel: &CancellationToken) -> Result<()>;
}

/// Waits for the clip's length without producing sound
///
/// Keeps speech pacing for front ends that hand audio to another device, and
/// serves as the player on builds without the `voice` feature.
#[derive(Debug, Clone)]
pub struct PacedPlayer {
    mp3_bitrate_kbps: u32,
    pacing: f64,
}

impl Default for PacedPlayer {
    fn default() -> Self {
        Self::new(DEFAULT_MP3_BITRATE_KBPS, DEFAULT_PACING)
    }
}

impl PacedPlayer {
    pub fn new(mp3_bitrate_kbps: u32, pacing: f64) -> Self {
        Self { mp3_bitrate_kbps, pacing: pacing.max(0.0) }
    }

    /// Time waited for a clip
    pub fn wait_for(&self, clip: &AudioClip) -> Result<Duration> {
        Ok(clip.duration(self.mp3_bitrate_kbps)?.mul_f64(self.pacing))
    }
}

#[async_trait]
impl AudioPlayer for PacedPlayer {
    async fn play(&self, clip: &AudioClip, cancel: &CancellationToken) -> Result<()> {
        let wait = self.wait_for(clip)?;
        debug!("Pacing clip for {:?}", wait);
        tokio::select! {
            _ = cancel.cancelled() => debug!("Playback cancelled"),
            _ = tokio::time::sleep(wait) => {}
        }
        Ok(())
    }
}

/// Speaker output through rodio
#[cfg(feature = "voice")]
#[derive(Debug, Clone, Default)]
pub struct RodioPlayer {
    volume: Option<f32>,
}

#[cfg(feature = "voice")]
impl RodioPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set volume (0.0 to 1.0)
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume.clamp(0.0, 1.0));
        self
    }
}

#[cfg(feature = "voice")]
#[async_trait]
impl AudioPlayer for RodioPlayer {
    async fn play(&self, clip: &AudioClip, cancel: &CancellationToken) -> Result<()> {
        if clip.is_empty() {
            return Ok(());
        }
        let bytes = clip.bytes().to_vec();
        let cancel = cancel.clone();
        let volume = self.volume;

        // The output stream is not Send, so it lives entirely on the blocking thread
        tokio::task::spawn_blocking(move || -> Result<()> {
            let (_stream, stream_handle) = rodio::OutputStream::try_default()
                .context("Failed to create audio output stream")?;
            let sink = rodio::Sink::try_new(&stream_handle)
                .context("Failed to create audio sink")?;
            if let Some(volume) = volume {
                sink.set_volume(volume);
            }
            let source = rodio::Decoder::new(Cursor::new(bytes))
                .context("Failed to decode audio clip")?;
            sink.append(source);

            while !sink.empty() {
                if cancel.is_cancelled() {
                    sink.stop();
                    debug!("Audio playback stopped");
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Ok(())
        })
        .await
        .context("Playback task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_clip(samples: u32, rate: u32) -> AudioClip {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..samples {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        AudioClip::new(cursor.into_inner(), AudioFormat::Wav)
    }

    #[test]
    fn test_wav_duration_is_exact() {
        let clip = wav_clip(8000, 16000);
        assert_eq!(clip.duration(48).unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_mp3_duration_estimated_from_bitrate() {
        // 6000 bytes at 48 kbps = 1 second
        let clip = AudioClip::new(vec![0; 6000], AudioFormat::Mp3);
        assert_eq!(clip.duration(48).unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_wav_is_an_error() {
        let clip = AudioClip::new(b"not a wav".to_vec(), AudioFormat::Wav);
        assert!(clip.duration(48).is_err());
    }

    #[test]
    fn test_paced_wait_applies_factor() {
        let player = PacedPlayer::new(48, DEFAULT_PACING);
        let clip = AudioClip::new(vec![0; 5700], AudioFormat::Mp3);
        // 950 ms of audio paced to one second
        let wait = player.wait_for(&clip).unwrap();
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_player_waits_full_clip() {
        let player = PacedPlayer::new(48, 1.0);
        let clip = AudioClip::new(vec![0; 12000], AudioFormat::Mp3);
        let started = tokio::time::Instant::now();
        player.play(&clip, &CancellationToken::new()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_player_returns_on_cancel() {
        let player = PacedPlayer::new(48, 1.0);
        let clip = AudioClip::new(vec![0; 600_000], AudioFormat::Mp3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = tokio::time::Instant::now();
        player.play(&clip, &cancel).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
