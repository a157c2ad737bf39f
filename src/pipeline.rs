//! Speak-then-translate: one recognition session feeding one translation.
//! The whole run is timed as a single `pipeline` event; its parts keep
//! their own `speech-to-text` and `translation` events.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::audio::recognition::{RecognitionError, SpeechToText, Transcript};
use crate::metrics::{Metadata, MetricsRecorder, Stage};
use crate::translate::{Language, TranslateError, Translation, TranslationRequest, TranslationService};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceTranslation {
    pub transcript: Transcript,
    pub translation: Translation,
}

pub struct VoicePipeline {
    speech: Arc<SpeechToText>,
    translations: Arc<TranslationService>,
    metrics: Arc<MetricsRecorder>,
}

impl VoicePipeline {
    pub fn new(
        speech: Arc<SpeechToText>,
        translations: Arc<TranslationService>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            speech,
            translations,
            metrics,
        }
    }

    pub async fn listen_and_translate(
        &self,
        source: &Language,
        target: &Language,
    ) -> Result<VoiceTranslation, PipelineError> {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), source.code.clone().into());
        metadata.insert("target".into(), target.code.clone().into());

        let run = self
            .metrics
            .measure(Stage::Pipeline, metadata, self.run(source, target))
            .await?;
        info!(
            source = %source.code,
            target = %target.code,
            chars = run.transcript.text.chars().count(),
            "voice translation complete"
        );
        Ok(run)
    }

    async fn run(&self, source: &Language, target: &Language) -> Result<VoiceTranslation, PipelineError> {
        let transcript = self.speech.listen(source).await?;
        let request = TranslationRequest::new(transcript.text.clone(), source.clone(), target.clone());
        let translation = self.translations.translate(&request).await?;
        Ok(VoiceTranslation {
            transcript,
            translation,
        })
    }
}
