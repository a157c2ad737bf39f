//! Contracts for the remote translation and speech-synthesis providers.

use async_trait::async_trait;
use thiserror::Error;

/// Remote call failed or returned unusable data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider rate limited")]
    RateLimited,
    #[error("provider request timed out")]
    Timeout,
    #[error("provider returned no {0}")]
    EmptyPayload(&'static str),
    #[error("malformed provider payload: {0}")]
    Malformed(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Translate `text` between two human-readable language names
    /// (e.g. "English", "Hindi"). Empty results are errors.
    async fn translate(
        &self,
        text: &str,
        source_language_name: &str,
        target_language_name: &str,
    ) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait SpeechSynthesisProvider: Send + Sync {
    /// Raw 16-bit little-endian mono PCM at 24 kHz.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Stand-in when no provider credentials are available. Every call fails
/// with [`ProviderError::NotConfigured`], so playback falls back to the
/// device and translation reports the reason.
pub struct Unconfigured {
    reason: String,
}

impl Unconfigured {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TranslationProvider for Unconfigured {
    async fn translate(&self, _: &str, _: &str, _: &str) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured(self.reason.clone()))
    }
}

#[async_trait]
impl SpeechSynthesisProvider for Unconfigured {
    async fn synthesize(&self, _: &str) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::NotConfigured(self.reason.clone()))
    }
}
