//! Request scheduler: turns a burst of text-input changes into at most one
//! translation per settled input.
//!
//! Each change cancels the pending attempt and arms a new one that fires
//! after the debounce window. A fired attempt goes through
//! [`TranslationService`], which supplies the cache and single-flight
//! guarantees. Offline input is refused synchronously and never scheduled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::cancellation::TaskGeneration;
use crate::network::NetworkSignal;
use crate::translate::{TranslateError, Translation, TranslationRequest, TranslationService};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Result slot for one scheduled attempt.
pub struct PendingTranslation {
    rx: oneshot::Receiver<Result<Translation, TranslateError>>,
    generation: u64,
}

impl PendingTranslation {
    /// Resolves to the translation, or [`TranslateError::Superseded`] if newer
    /// input replaced this attempt before its result could be published.
    pub async fn outcome(self) -> Result<Translation, TranslateError> {
        self.rx.await.unwrap_or(Err(TranslateError::Superseded))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct RequestScheduler {
    service: Arc<TranslationService>,
    network: NetworkSignal,
    debounce: Duration,
    input: TaskGeneration,
}

impl RequestScheduler {
    pub fn new(service: Arc<TranslationService>, network: NetworkSignal, debounce: Duration) -> Self {
        Self {
            service,
            network,
            debounce,
            input: TaskGeneration::new(),
        }
    }

    /// Register a text change. Any attempt still waiting out its debounce
    /// window is cancelled outright.
    ///
    /// Must be called within a Tokio runtime.
    pub fn on_input(&self, request: TranslationRequest) -> Result<PendingTranslation, TranslateError> {
        let guard = self.input.cancel_and_advance();
        if request.is_blank() {
            return Err(TranslateError::EmptyInput);
        }
        if self.network.is_offline() {
            debug!("offline, translation not scheduled");
            return Err(TranslateError::NetworkUnavailable);
        }

        let (tx, rx) = oneshot::channel();
        let generation = guard.my_generation();
        let service = Arc::clone(&self.service);
        let delay = self.debounce;

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = guard.token().cancelled() => {
                    debug!(generation, "debounced attempt cancelled");
                    let _ = tx.send(Err(TranslateError::Superseded));
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let result = service.translate(&request).await;
            // Newer input arrived while the call was in flight: the result is
            // cached but must not reach the caller as current.
            if !guard.is_current() {
                debug!(generation, "translation finished after newer input");
                let _ = tx.send(Err(TranslateError::Superseded));
                return;
            }
            let _ = tx.send(result);
        });

        Ok(PendingTranslation { rx, generation })
    }

    /// Translate immediately, bypassing the debounce window. Supersedes any
    /// pending attempt.
    pub async fn translate_now(&self, request: &TranslationRequest) -> Result<Translation, TranslateError> {
        self.input.cancel_and_advance();
        self.service.translate(request).await
    }

    /// Drop whatever attempt is waiting to fire.
    pub fn cancel_pending(&self) {
        self.input.cancel_and_advance();
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::history::HistoryStore;
    use crate::metrics::MetricsRecorder;
    use crate::network::{ConnectivityEvent, NetworkMode, NetworkModeMonitor};
    use crate::provider::{ProviderError, TranslationProvider};
    use crate::storage::{RecordStore, SqliteStore};
    use crate::translate::cache::{TranslationCache, DEFAULT_CACHE_TTL};
    use crate::translate::{Language, TranslationOrigin};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TranslationProvider for RecordingProvider {
        async fn translate(&self, text: &str, _: &str, _: &str) -> Result<String, ProviderError> {
            self.seen.lock().push(text.to_string());
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(text.to_uppercase())
        }
    }

    fn scheduler() -> (RequestScheduler, Arc<RecordingProvider>, NetworkModeMonitor) {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(0));
        let monitor = NetworkModeMonitor::new(NetworkMode::Online);
        let provider = Arc::new(RecordingProvider::default());
        let service = Arc::new(TranslationService::new(
            provider.clone(),
            Arc::new(TranslationCache::new(
                500,
                DEFAULT_CACHE_TTL,
                Arc::clone(&store),
                clock.clone(),
            )),
            Arc::new(HistoryStore::new(50, Arc::clone(&store), clock.clone())),
            Arc::new(MetricsRecorder::new(1000, store, clock, monitor.signal())),
            monitor.signal(),
        ));
        let scheduler = RequestScheduler::new(service, monitor.signal(), DEFAULT_DEBOUNCE);
        (scheduler, provider, monitor)
    }

    fn typed(text: &str) -> TranslationRequest {
        TranslationRequest::new(
            text,
            Language::new("en-US", "English"),
            Language::new("fr-FR", "French"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_last_input() {
        let (scheduler, provider, _monitor) = scheduler();
        let mut pending = Vec::new();
        for text in ["h", "he", "hel", "hell", "hello"] {
            pending.push(scheduler.on_input(typed(text)).unwrap());
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let last = pending.pop().unwrap();
        for stale in pending {
            assert_eq!(stale.outcome().await, Err(TranslateError::Superseded));
        }
        let translation = last.outcome().await.unwrap();
        assert_eq!(translation.text, "HELLO");
        assert_eq!(*provider.seen.lock(), vec!["hello".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_fires_before_the_window_elapses() {
        let (scheduler, provider, _monitor) = scheduler();
        let _pending = scheduler.on_input(typed("bonjour")).unwrap();
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(provider.seen.lock().is_empty());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(provider.seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn input_during_flight_supersedes_the_result() {
        let (scheduler, provider, _monitor) = scheduler();
        let first = scheduler.on_input(typed("cat")).unwrap();
        // Past the window, inside the 300ms provider call.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let second = scheduler.on_input(typed("dog")).unwrap();

        assert_eq!(first.outcome().await, Err(TranslateError::Superseded));
        assert_eq!(second.outcome().await.unwrap().text, "DOG");
        // The superseded call still completed and was cached.
        let cached = scheduler.translate_now(&typed("cat")).await.unwrap();
        assert_eq!(cached.origin, TranslationOrigin::Cache);
        assert_eq!(provider.seen.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_is_refused_synchronously_and_cancels_pending() {
        let (scheduler, provider, monitor) = scheduler();
        let pending = scheduler.on_input(typed("hello")).unwrap();
        monitor.apply(ConnectivityEvent::Offline);

        assert!(matches!(
            scheduler.on_input(typed("hello!")),
            Err(TranslateError::NetworkUnavailable)
        ));
        assert_eq!(pending.outcome().await, Err(TranslateError::Superseded));
        assert!(provider.seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_the_input_cancels_pending() {
        let (scheduler, provider, _monitor) = scheduler();
        let pending = scheduler.on_input(typed("hello")).unwrap();
        assert!(matches!(
            scheduler.on_input(typed("   ")),
            Err(TranslateError::EmptyInput)
        ));
        assert_eq!(pending.outcome().await, Err(TranslateError::Superseded));
        assert!(provider.seen.lock().is_empty());
    }
}
