//! Audio playback arbiter.
//!
//! At most one stream plays at a time across both sides of the UI. A request
//! made while another is active is rejected at once, never queued. Online,
//! playback tries remote synthesis first and falls back to on-device speech
//! on any provider, decode, or output failure; offline it goes straight to
//! the device. The playing lock is a [`PlaybackLease`] released by `Drop`,
//! so it is freed exactly once on every exit path.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    decode_pcm16, AudioDecodeError, AudioOutput, LocalSpeechSynthesizer, PcmFormat,
    DeviceCapability, UnsupportedCapabilityError,
};
use crate::cancellation::TaskGeneration;
use crate::metrics::{Metadata, MetricsRecorder, Stage};
use crate::network::NetworkSignal;
use crate::preferences::{Preferences, PreferencesStore};
use crate::provider::{ProviderError, SpeechSynthesisProvider};
use crate::translate::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlaybackSide {
    Source,
    Target,
}

#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub text: String,
    pub language: Language,
    pub side: PlaybackSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackPath {
    Remote,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackOutcome {
    Completed,
    /// Ended early by [`AudioPlaybackArbiter::stop`].
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackReport {
    pub side: PlaybackSide,
    pub path: PlaybackPath,
    pub outcome: PlaybackOutcome,
    /// Why remote synthesis was abandoned, when it was.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("playback already active on the {active:?} side")]
    Busy { active: PlaybackSide },
    #[error("nothing to play")]
    EmptyText,
    #[error(transparent)]
    Unsupported(#[from] UnsupportedCapabilityError),
    #[error("on-device synthesis failed: {0}")]
    LocalSynthesis(String),
}

#[derive(Debug, Error)]
enum RemoteFailure {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Decode(#[from] AudioDecodeError),
    #[error("audio output failed: {0}")]
    Output(String),
}

/// Holding this means the caller owns the single playback slot.
pub struct PlaybackLease {
    slot: Arc<watch::Sender<Option<PlaybackSide>>>,
    side: PlaybackSide,
}

impl Drop for PlaybackLease {
    fn drop(&mut self) {
        self.slot.send_replace(None);
        debug!(side = ?self.side, "playback lock released");
    }
}

pub struct AudioPlaybackArbiter {
    slot: Arc<watch::Sender<Option<PlaybackSide>>>,
    /// Serializes slot admission with `stop()`.
    admission: Mutex<()>,
    playback: TaskGeneration,
    synthesizer: Arc<dyn SpeechSynthesisProvider>,
    output: Arc<dyn AudioOutput>,
    local: Arc<dyn LocalSpeechSynthesizer>,
    network: NetworkSignal,
    metrics: Arc<MetricsRecorder>,
    preferences: Arc<PreferencesStore>,
    format: PcmFormat,
}

impl AudioPlaybackArbiter {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesisProvider>,
        output: Arc<dyn AudioOutput>,
        local: Arc<dyn LocalSpeechSynthesizer>,
        network: NetworkSignal,
        metrics: Arc<MetricsRecorder>,
        preferences: Arc<PreferencesStore>,
    ) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
            admission: Mutex::new(()),
            playback: TaskGeneration::new(),
            synthesizer,
            output,
            local,
            network,
            metrics,
            preferences,
            format: PcmFormat::default(),
        }
    }

    /// Side currently playing, if any.
    pub fn active(&self) -> Option<PlaybackSide> {
        *self.slot.borrow()
    }

    /// Follow the playing side (for per-side indicators).
    pub fn subscribe(&self) -> watch::Receiver<Option<PlaybackSide>> {
        self.slot.subscribe()
    }

    /// Claim the playback slot, or report who holds it.
    pub fn try_acquire(&self, side: PlaybackSide) -> Result<PlaybackLease, PlaybackError> {
        let mut holder = None;
        let acquired = self.slot.send_if_modified(|slot| match *slot {
            Some(active) => {
                holder = Some(active);
                false
            }
            None => {
                *slot = Some(side);
                true
            }
        });
        if !acquired {
            let active = holder.unwrap_or(side);
            debug!(requested = ?side, active = ?active, "playback rejected, slot busy");
            return Err(PlaybackError::Busy { active });
        }
        Ok(PlaybackLease {
            slot: Arc::clone(&self.slot),
            side,
        })
    }

    /// Stop the active playback, if any. Its `play` call resolves with
    /// [`PlaybackOutcome::Stopped`].
    pub fn stop(&self) {
        let _admission = self.admission.lock();
        self.playback.cancel_current();
    }

    /// Play `request.text`. Rejection for a busy slot happens before the
    /// first suspension point.
    pub async fn play(&self, request: PlaybackRequest) -> Result<PlaybackReport, PlaybackError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(PlaybackError::EmptyText);
        }
        // The slot and the new token appear together, so a stop() that sees
        // the slot busy always cancels this playback.
        let (_lease, guard) = {
            let _admission = self.admission.lock();
            let lease = self.try_acquire(request.side)?;
            (lease, self.playback.cancel_and_advance())
        };
        let prefs = self.preferences.get();

        if self.network.is_offline() {
            info!(side = ?request.side, "offline, using on-device synthesis");
            let outcome = self
                .play_local(text, &request.language, prefs, guard.token())
                .await?;
            return Ok(PlaybackReport {
                side: request.side,
                path: PlaybackPath::Local,
                outcome,
                fallback_reason: None,
            });
        }

        match self.play_remote(text, prefs, guard.token()).await {
            Ok(outcome) => Ok(PlaybackReport {
                side: request.side,
                path: PlaybackPath::Remote,
                outcome,
                fallback_reason: None,
            }),
            Err(failure) => {
                warn!(
                    side = ?request.side,
                    language = %request.language.code,
                    error = %failure,
                    "remote synthesis failed, falling back to device voice"
                );
                let outcome = self
                    .play_local(text, &request.language, prefs, guard.token())
                    .await?;
                Ok(PlaybackReport {
                    side: request.side,
                    path: PlaybackPath::Local,
                    outcome,
                    fallback_reason: Some(failure.to_string()),
                })
            }
        }
    }

    async fn play_remote(
        &self,
        text: &str,
        prefs: Preferences,
        cancel: &CancellationToken,
    ) -> Result<PlaybackOutcome, RemoteFailure> {
        let mut metadata = Metadata::new();
        metadata.insert("chars".into(), text.chars().count().into());

        self.metrics
            .measure(
                Stage::SpeechSynthesis,
                metadata,
                self.synthesize_and_play(text, prefs, cancel),
            )
            .await
    }

    async fn synthesize_and_play(
        &self,
        text: &str,
        prefs: Preferences,
        cancel: &CancellationToken,
    ) -> Result<PlaybackOutcome, RemoteFailure> {
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PlaybackOutcome::Stopped),
            bytes = self.synthesizer.synthesize(text) => bytes?,
        };
        let audio = decode_pcm16(&bytes, self.format)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(PlaybackOutcome::Stopped),
            played = self.output.play(audio, prefs.volume) => {
                played.map_err(RemoteFailure::Output)?;
                Ok(PlaybackOutcome::Completed)
            }
        }
    }

    async fn play_local(
        &self,
        text: &str,
        language: &Language,
        prefs: Preferences,
        cancel: &CancellationToken,
    ) -> Result<PlaybackOutcome, PlaybackError> {
        if self.local.capability() == DeviceCapability::Unavailable {
            warn!("no on-device speech synthesis available");
            return Err(UnsupportedCapabilityError("speech synthesis").into());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(PlaybackOutcome::Stopped),
            spoken = self.local.speak(text, &language.code, prefs.volume, prefs.rate) => {
                spoken.map_err(PlaybackError::LocalSynthesis)?;
                Ok(PlaybackOutcome::Completed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::DecodedAudio;
    use crate::clock::ManualClock;
    use crate::network::{ConnectivityEvent, NetworkMode, NetworkModeMonitor};
    use crate::storage::SqliteStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeSynth {
        calls: AtomicUsize,
        reply: Result<Vec<u8>, ProviderError>,
    }

    #[async_trait]
    impl SpeechSynthesisProvider for FakeSynth {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    struct FakeOutput {
        plays: AtomicUsize,
        length: Duration,
        unplugged: AtomicBool,
    }

    #[async_trait]
    impl AudioOutput for FakeOutput {
        async fn play(&self, _audio: DecodedAudio, _volume: f32) -> Result<(), String> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            if self.unplugged.load(Ordering::SeqCst) {
                return Err("output device disconnected".into());
            }
            tokio::time::sleep(self.length).await;
            Ok(())
        }
    }

    struct FakeDevice {
        capability: DeviceCapability,
        spoken: AtomicUsize,
        broken: AtomicBool,
    }

    #[async_trait]
    impl LocalSpeechSynthesizer for FakeDevice {
        fn capability(&self) -> DeviceCapability {
            self.capability
        }

        async fn speak(&self, _: &str, _: &str, _: f32, _: f32) -> Result<(), String> {
            self.spoken.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            if self.broken.load(Ordering::SeqCst) {
                return Err("voice engine crashed".into());
            }
            Ok(())
        }
    }

    struct Rig {
        arbiter: Arc<AudioPlaybackArbiter>,
        monitor: NetworkModeMonitor,
        synth: Arc<FakeSynth>,
        output: Arc<FakeOutput>,
        device: Arc<FakeDevice>,
    }

    fn rig(reply: Result<Vec<u8>, ProviderError>, capability: DeviceCapability) -> Rig {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let monitor = NetworkModeMonitor::new(NetworkMode::Online);
        let metrics = Arc::new(MetricsRecorder::new(
            100,
            store.clone(),
            Arc::new(ManualClock::new(0)),
            monitor.signal(),
        ));
        let synth = Arc::new(FakeSynth {
            calls: AtomicUsize::new(0),
            reply,
        });
        let output = Arc::new(FakeOutput {
            plays: AtomicUsize::new(0),
            length: Duration::from_secs(1),
            unplugged: AtomicBool::new(false),
        });
        let device = Arc::new(FakeDevice {
            capability,
            spoken: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
        });
        let arbiter = Arc::new(AudioPlaybackArbiter::new(
            synth.clone(),
            output.clone(),
            device.clone(),
            monitor.signal(),
            metrics,
            Arc::new(PreferencesStore::new(store)),
        ));
        Rig {
            arbiter,
            monitor,
            synth,
            output,
            device,
        }
    }

    fn request(side: PlaybackSide) -> PlaybackRequest {
        PlaybackRequest {
            text: "नमस्ते".into(),
            language: Language::new("hi-IN", "Hindi"),
            side,
        }
    }

    fn pcm() -> Result<Vec<u8>, ProviderError> {
        Ok(vec![0u8; 480])
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_is_rejected_while_first_plays() {
        let rig = rig(pcm(), DeviceCapability::Available);
        let arbiter = Arc::clone(&rig.arbiter);
        let first = tokio::spawn(async move { arbiter.play(request(PlaybackSide::Source)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(rig.arbiter.active(), Some(PlaybackSide::Source));
        assert_eq!(
            rig.arbiter.play(request(PlaybackSide::Target)).await,
            Err(PlaybackError::Busy {
                active: PlaybackSide::Source
            })
        );

        let report = first.await.unwrap().unwrap();
        assert_eq!(report.path, PlaybackPath::Remote);
        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(rig.output.plays.load(Ordering::SeqCst), 1);
        assert_eq!(rig.arbiter.active(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_never_reaches_remote_synthesis() {
        let rig = rig(pcm(), DeviceCapability::Available);
        rig.monitor.apply(ConnectivityEvent::Offline);

        let report = rig.arbiter.play(request(PlaybackSide::Target)).await.unwrap();
        assert_eq!(report.path, PlaybackPath::Local);
        assert_eq!(rig.synth.calls.load(Ordering::SeqCst), 0);
        assert_eq!(rig.device.spoken.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_failure_falls_back_and_releases_once() {
        let rig = rig(
            Err(ProviderError::EmptyPayload("audio data")),
            DeviceCapability::Available,
        );
        let mut watcher = rig.arbiter.subscribe();

        let report = rig.arbiter.play(request(PlaybackSide::Source)).await.unwrap();
        assert_eq!(report.path, PlaybackPath::Local);
        assert!(report.fallback_reason.unwrap().contains("audio data"));
        assert_eq!(rig.arbiter.active(), None);
        assert_eq!(*watcher.borrow_and_update(), None);

        // Lock is usable again.
        assert!(rig.arbiter.play(request(PlaybackSide::Target)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_audio_falls_back() {
        let rig = rig(Ok(vec![1, 2, 3]), DeviceCapability::Available);
        let report = rig.arbiter.play(request(PlaybackSide::Source)).await.unwrap();
        assert_eq!(report.path, PlaybackPath::Local);
        assert_eq!(rig.output.plays.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_device_voice_is_surfaced() {
        let rig = rig(pcm(), DeviceCapability::Unavailable);
        rig.monitor.apply(ConnectivityEvent::Offline);

        assert_eq!(
            rig.arbiter.play(request(PlaybackSide::Source)).await,
            Err(PlaybackError::Unsupported(UnsupportedCapabilityError(
                "speech synthesis"
            )))
        );
        assert_eq!(rig.arbiter.active(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_playback_and_frees_the_slot() {
        let rig = rig(pcm(), DeviceCapability::Available);
        let arbiter = Arc::clone(&rig.arbiter);
        let playing = tokio::spawn(async move { arbiter.play(request(PlaybackSide::Target)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        rig.arbiter.stop();
        let report = playing.await.unwrap().unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Stopped);
        assert_eq!(rig.arbiter.active(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn output_failure_falls_back_to_device_voice() {
        let rig = rig(pcm(), DeviceCapability::Available);
        rig.output.unplugged.store(true, Ordering::SeqCst);

        let report = rig.arbiter.play(request(PlaybackSide::Target)).await.unwrap();
        assert_eq!(report.path, PlaybackPath::Local);
        assert!(report
            .fallback_reason
            .unwrap()
            .contains("output device disconnected"));
        assert_eq!(rig.output.plays.load(Ordering::SeqCst), 1);
        assert_eq!(rig.device.spoken.load(Ordering::SeqCst), 1);
        assert_eq!(rig.arbiter.active(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fallback_is_surfaced_and_releases_the_slot() {
        let rig = rig(
            Err(ProviderError::Timeout),
            DeviceCapability::Available,
        );
        rig.device.broken.store(true, Ordering::SeqCst);

        assert_eq!(
            rig.arbiter.play(request(PlaybackSide::Source)).await,
            Err(PlaybackError::LocalSynthesis("voice engine crashed".into()))
        );
        assert_eq!(rig.arbiter.active(), None);

        rig.device.broken.store(false, Ordering::SeqCst);
        assert!(rig.arbiter.play(request(PlaybackSide::Target)).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_after_slot_is_visible_always_lands() {
        let rig = rig(pcm(), DeviceCapability::Available);
        for _ in 0..20 {
            let mut active = rig.arbiter.subscribe();
            let arbiter = Arc::clone(&rig.arbiter);
            let playing =
                tokio::spawn(async move { arbiter.play(request(PlaybackSide::Source)).await });
            active.wait_for(|side| side.is_some()).await.unwrap();

            rig.arbiter.stop();
            let report = playing.await.unwrap().unwrap();
            assert_eq!(report.outcome, PlaybackOutcome::Stopped);
        }
    }

    #[tokio::test]
    async fn blank_text_does_not_take_the_lock() {
        let rig = rig(pcm(), DeviceCapability::Available);
        let mut blank = request(PlaybackSide::Source);
        blank.text = "  ".into();
        assert_eq!(rig.arbiter.play(blank).await, Err(PlaybackError::EmptyText));
        assert_eq!(rig.arbiter.active(), None);
    }
}
