//! LangLink: resilient translation core.
//! Debounced, cached, single-flight translation with an offline mode, a
//! single-stream audio playback arbiter, speech recognition sessions and a
//! rated evaluation run. This module wires the pieces together; the UI
//! layer talks to [`LangLink`].

pub mod audio;
pub mod cancellation;
pub mod clock;
pub mod config;
pub mod evaluation;
pub mod gemini;
pub mod history;
pub mod metrics;
pub mod network;
pub mod pipeline;
pub mod preferences;
pub mod provider;
pub mod scheduler;
pub mod storage;
pub mod translate;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use audio::arbiter::AudioPlaybackArbiter;
use audio::recognition::SpeechToText;
use audio::{AudioOutput, LocalSpeechSynthesizer, SpeechRecognizer};
use clock::Clock;
use config::Config;
use evaluation::{Dashboard, EvaluationRunner, EvaluationStore};
use history::HistoryStore;
use metrics::MetricsRecorder;
use network::{NetworkMode, NetworkModeMonitor};
use pipeline::VoicePipeline;
use preferences::PreferencesStore;
use provider::{SpeechSynthesisProvider, TranslationProvider};
use scheduler::RequestScheduler;
use storage::RecordStore;
use translate::cache::TranslationCache;
use translate::TranslationService;

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
/// Logs go to stderr; a second call is a no-op.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("langlink=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// External collaborators injected at startup.
pub struct Collaborators {
    pub translator: Arc<dyn TranslationProvider>,
    pub synthesizer: Arc<dyn SpeechSynthesisProvider>,
    pub local_speech: Arc<dyn LocalSpeechSynthesizer>,
    pub audio_output: Arc<dyn AudioOutput>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
}

/// Composition root. Every component shares one record store, one clock
/// and one network monitor.
pub struct LangLink {
    pub network: Arc<NetworkModeMonitor>,
    pub cache: Arc<TranslationCache>,
    pub history: Arc<HistoryStore>,
    pub metrics: Arc<MetricsRecorder>,
    pub preferences: Arc<PreferencesStore>,
    pub translations: Arc<TranslationService>,
    pub scheduler: RequestScheduler,
    pub playback: AudioPlaybackArbiter,
    pub speech: Arc<SpeechToText>,
    pub voice: VoicePipeline,
    pub evaluations: Arc<EvaluationStore>,
    pub evaluation: EvaluationRunner,
}

impl LangLink {
    pub fn assemble(
        config: &Config,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        initial_mode: NetworkMode,
        collaborators: Collaborators,
    ) -> Self {
        let network = Arc::new(NetworkModeMonitor::new(initial_mode));
        let cache = Arc::new(TranslationCache::new(
            config.cache_capacity,
            config.cache_ttl(),
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let history = Arc::new(HistoryStore::new(
            config.history_capacity,
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let metrics = Arc::new(MetricsRecorder::new(
            config.metrics_capacity,
            Arc::clone(&store),
            Arc::clone(&clock),
            network.signal(),
        ));
        let preferences = Arc::new(PreferencesStore::new(Arc::clone(&store)));
        let evaluations = Arc::new(EvaluationStore::new(store));

        let translations = Arc::new(TranslationService::new(
            collaborators.translator,
            Arc::clone(&cache),
            Arc::clone(&history),
            Arc::clone(&metrics),
            network.signal(),
        ));
        let scheduler = RequestScheduler::new(
            Arc::clone(&translations),
            network.signal(),
            config.debounce(),
        );
        let playback = AudioPlaybackArbiter::new(
            collaborators.synthesizer,
            collaborators.audio_output,
            collaborators.local_speech,
            network.signal(),
            Arc::clone(&metrics),
            Arc::clone(&preferences),
        );
        let speech = Arc::new(SpeechToText::new(
            collaborators.recognizer,
            Arc::clone(&metrics),
        ));
        let voice = VoicePipeline::new(
            Arc::clone(&speech),
            Arc::clone(&translations),
            Arc::clone(&metrics),
        );
        let evaluation = EvaluationRunner::new(
            Arc::clone(&translations),
            Arc::clone(&metrics),
            Arc::clone(&evaluations),
            clock,
        );

        info!(
            mode = %initial_mode,
            cached = cache.len(),
            history = history.len(),
            rated = evaluations.len(),
            "langlink assembled"
        );

        Self {
            network,
            cache,
            history,
            metrics,
            preferences,
            translations,
            scheduler,
            playback,
            speech,
            voice,
            evaluations,
            evaluation,
        }
    }

    /// Per-stage latency stats next to the average evaluation rating.
    pub fn dashboard(&self) -> Dashboard {
        Dashboard::collect(&self.metrics, &self.evaluations)
    }

    /// Clears metrics and evaluation results. Cache and history are kept.
    pub fn reset_dashboard(&self) {
        self.metrics.clear();
        self.evaluations.clear();
    }
}
