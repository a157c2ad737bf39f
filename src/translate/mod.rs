//! Translation service: cache → single-flight provider call → write-through.
//! Every provider call is timed by the metrics recorder; a successful call
//! refreshes the cache and appends to history exactly once, however many
//! callers were waiting on it.

pub mod cache;
pub mod fingerprint;
pub mod single_flight;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::history::HistoryStore;
use crate::metrics::{Metadata, MetricsRecorder, Stage};
use crate::network::NetworkSignal;
use crate::provider::{ProviderError, TranslationProvider};
use cache::TranslationCache;
use fingerprint::{normalize, Fingerprint};
use single_flight::{FlightAborted, SingleFlight};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Language {
    /// BCP 47 tag, e.g. "hi-IN". Used as the language id in fingerprints.
    pub code: String,
    /// Display name handed to the provider, e.g. "Hindi".
    pub name: String,
}

impl Language {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub text: String,
    pub source: Language,
    pub target: Language,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, source: Language, target: Language) -> Self {
        Self {
            text: text.into(),
            source,
            target,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.text, &self.source.code, &self.target.code)
    }

    pub fn is_blank(&self) -> bool {
        normalize(&self.text).is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TranslationOrigin {
    Cache,
    Provider,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    pub origin: TranslationOrigin,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("translation is unavailable offline")]
    NetworkUnavailable,
    #[error("nothing to translate")]
    EmptyInput,
    #[error("superseded by newer input")]
    Superseded,
    #[error(transparent)]
    Aborted(#[from] FlightAborted),
}

/// Collaborators a provider call needs once it has been detached from the
/// caller that started it.
#[derive(Clone)]
struct CallContext {
    provider: Arc<dyn TranslationProvider>,
    cache: Arc<TranslationCache>,
    history: Arc<HistoryStore>,
    metrics: Arc<MetricsRecorder>,
}

pub struct TranslationService {
    ctx: CallContext,
    network: NetworkSignal,
    flights: SingleFlight<Fingerprint, Result<String, TranslateError>>,
}

impl TranslationService {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        cache: Arc<TranslationCache>,
        history: Arc<HistoryStore>,
        metrics: Arc<MetricsRecorder>,
        network: NetworkSignal,
    ) -> Self {
        Self {
            ctx: CallContext {
                provider,
                cache,
                history,
                metrics,
            },
            network,
            flights: SingleFlight::new(),
        }
    }

    /// Resolve a request: offline rejection, cache hit, or the single
    /// in-flight provider call for its fingerprint.
    pub async fn translate(&self, request: &TranslationRequest) -> Result<Translation, TranslateError> {
        if request.is_blank() {
            return Err(TranslateError::EmptyInput);
        }
        if self.network.is_offline() {
            return Err(TranslateError::NetworkUnavailable);
        }

        let fingerprint = request.fingerprint();
        if let Some(entry) = self.ctx.cache.get(&fingerprint) {
            return Ok(Translation {
                text: entry.result_text,
                origin: TranslationOrigin::Cache,
                fingerprint,
            });
        }

        if self.flights.is_pending(&fingerprint) {
            debug!(fingerprint = %fingerprint, "attaching to in-flight translation");
        }
        let ctx = self.ctx.clone();
        let owned = request.clone();
        let key = fingerprint.clone();
        let text = self
            .flights
            .run(fingerprint.clone(), move || call_provider(ctx, key, owned))
            .await??;

        Ok(Translation {
            text,
            origin: TranslationOrigin::Provider,
            fingerprint,
        })
    }

    /// Cache lookup only. Works offline.
    pub fn cached(&self, request: &TranslationRequest) -> Option<String> {
        if request.is_blank() {
            return None;
        }
        self.ctx
            .cache
            .get(&request.fingerprint())
            .map(|entry| entry.result_text)
    }

    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }
}

async fn call_provider(
    ctx: CallContext,
    fingerprint: Fingerprint,
    request: TranslationRequest,
) -> Result<String, TranslateError> {
    let text = normalize(&request.text);
    let mut metadata = Metadata::new();
    metadata.insert("source".into(), request.source.code.clone().into());
    metadata.insert("target".into(), request.target.code.clone().into());
    metadata.insert("chars".into(), text.chars().count().into());

    let result = ctx
        .metrics
        .measure(
            Stage::Translation,
            metadata,
            ctx.provider
                .translate(text, &request.source.name, &request.target.name),
        )
        .await;

    let translated = match result {
        Ok(translated) => translated,
        Err(e) => {
            warn!(fingerprint = %fingerprint, error = %e, "translation provider failed");
            return Err(e.into());
        }
    };

    ctx.cache.put(fingerprint.clone(), translated.clone());
    let item = ctx.history.new_item(
        request.source,
        request.target,
        text.to_string(),
        translated.clone(),
    );
    ctx.history.append(item);
    info!(fingerprint = %fingerprint, "translation complete");
    Ok(translated)
}
