//! Speech-to-text sessions.
//!
//! One session at a time: starting a new session or calling
//! [`SpeechToText::stop`] ends the current one, and the recognizer resolves
//! with whatever it heard. Every session logs a zero-latency `started`
//! marker and an end event carrying its duration.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::{DeviceCapability, SpeechRecognizer, UnsupportedCapabilityError};
use crate::cancellation::TaskGeneration;
use crate::metrics::{Metadata, MetricsRecorder, Stage};
use crate::translate::Language;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub language: Language,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedCapabilityError),
    #[error("speech recognition failed: {0}")]
    Failed(String),
    #[error("no speech detected")]
    NoSpeech,
}

pub struct SpeechToText {
    recognizer: Arc<dyn SpeechRecognizer>,
    metrics: Arc<MetricsRecorder>,
    session: TaskGeneration,
}

impl SpeechToText {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            recognizer,
            metrics,
            session: TaskGeneration::new(),
        }
    }

    pub fn capability(&self) -> DeviceCapability {
        self.recognizer.capability()
    }

    /// Run one recognition session in `language`.
    pub async fn listen(&self, language: &Language) -> Result<Transcript, RecognitionError> {
        if self.recognizer.capability() == DeviceCapability::Unavailable {
            warn!("no speech recognition available");
            return Err(UnsupportedCapabilityError("speech recognition").into());
        }
        let guard = self.session.cancel_and_advance();

        let mut started = Metadata::new();
        started.insert("status".into(), "started".into());
        started.insert("language".into(), language.code.clone().into());
        self.metrics.record(Stage::SpeechToText, 0, started);
        info!(language = %language.code, session = guard.my_generation(), "recognition session started");

        let start = tokio::time::Instant::now();
        let result = self
            .recognizer
            .recognize(&language.code, guard.token().clone())
            .await;
        let duration = start.elapsed();

        let mut ended = Metadata::new();
        ended.insert("status".into(), "ended".into());
        ended.insert("language".into(), language.code.clone().into());
        ended.insert("success".into(), result.is_ok().into());
        match &result {
            Ok(text) => {
                ended.insert("chars".into(), text.trim().chars().count().into());
            }
            Err(e) => {
                ended.insert("error".into(), e.clone().into());
            }
        }
        let latency_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.metrics.record(Stage::SpeechToText, latency_ms, ended);

        let text = result.map_err(|e| {
            warn!(error = %e, "recognition session failed");
            RecognitionError::Failed(e)
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Err(RecognitionError::NoSpeech);
        }
        Ok(Transcript {
            text: text.to_string(),
            language: language.clone(),
            duration,
        })
    }

    /// End the current session early. Its `listen` call still resolves with
    /// the partial transcript.
    pub fn stop(&self) {
        self.session.cancel_current();
    }
}
