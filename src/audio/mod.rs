//! Audio playback plumbing.
//! Remote synthesis returns raw PCM that is decoded here and handed to an
//! [`AudioOutput`]; the on-device fallback goes through a
//! [`LocalSpeechSynthesizer`]. The arbiter decides which path runs.
//! Microphone input goes through a [`SpeechRecognizer`], driven by
//! [`recognition::SpeechToText`].

pub mod arbiter;
pub mod recognition;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Format of remote synthesis payloads.
#[derive(Debug, Clone, Copy)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
        }
    }
}

/// Normalized f32 samples ready for an output device.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as f64 / self.channels.max(1) as f64;
        Duration::from_secs_f64(frames / self.sample_rate.max(1) as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioDecodeError {
    #[error("audio payload is empty")]
    Empty,
    #[error("audio payload length {0} is not a whole number of frames")]
    Truncated(usize),
}

/// Decode 16-bit little-endian interleaved PCM.
pub fn decode_pcm16(bytes: &[u8], format: PcmFormat) -> Result<DecodedAudio, AudioDecodeError> {
    if bytes.is_empty() {
        return Err(AudioDecodeError::Empty);
    }
    let frame_bytes = 2 * format.channels.max(1) as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(AudioDecodeError::Truncated(bytes.len()));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();
    Ok(DecodedAudio {
        samples,
        sample_rate: format.sample_rate,
        channels: format.channels,
    })
}

/// Device that plays decoded audio. The returned future resolves when the
/// clip ends; dropping it must stop playback.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn play(&self, audio: DecodedAudio, volume: f32) -> Result<(), String>;
}

/// Output with no device attached: waits out the clip in silence.
pub struct SilentOutput;

#[async_trait]
impl AudioOutput for SilentOutput {
    async fn play(&self, audio: DecodedAudio, _volume: f32) -> Result<(), String> {
        tokio::time::sleep(audio.duration()).await;
        Ok(())
    }
}

/// Whether an on-device speech engine (synthesis or recognition) exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCapability {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0} is not supported on this device")]
pub struct UnsupportedCapabilityError(pub &'static str);

#[async_trait]
pub trait LocalSpeechSynthesizer: Send + Sync {
    fn capability(&self) -> DeviceCapability;

    /// Speak `text` and resolve once the utterance ends.
    async fn speak(
        &self,
        text: &str,
        language_code: &str,
        volume: f32,
        rate: f32,
    ) -> Result<(), String>;
}

/// Runtime without on-device synthesis.
pub struct NoLocalSynthesis;

#[async_trait]
impl LocalSpeechSynthesizer for NoLocalSynthesis {
    fn capability(&self) -> DeviceCapability {
        DeviceCapability::Unavailable
    }

    async fn speak(&self, _: &str, _: &str, _: f32, _: f32) -> Result<(), String> {
        Err(UnsupportedCapabilityError("speech synthesis").to_string())
    }
}

/// One-shot speech recognition session.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn capability(&self) -> DeviceCapability;

    /// Listen in `language_code` until the speaker stops or `stop` is
    /// cancelled, then resolve with the transcript heard so far.
    async fn recognize(&self, language_code: &str, stop: CancellationToken) -> Result<String, String>;
}

/// Runtime without a microphone or recognition engine.
pub struct NoRecognition;

#[async_trait]
impl SpeechRecognizer for NoRecognition {
    fn capability(&self) -> DeviceCapability {
        DeviceCapability::Unavailable
    }

    async fn recognize(&self, _: &str, _: CancellationToken) -> Result<String, String> {
        Err(UnsupportedCapabilityError("speech recognition").to_string())
    }
}
