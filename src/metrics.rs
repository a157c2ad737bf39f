//! Observability: bounded ring buffer of per-stage latency events.
//! Every timed stage appends one event on completion, success or failure,
//! and the buffer is persisted as its own record.
//! `summary()` reports count / mean / p50 / p95 per stage.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::network::NetworkSignal;
use crate::storage::{load_record, record_keys, save_record, RecordStore};

pub const DEFAULT_METRICS_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    SpeechToText,
    Translation,
    SpeechSynthesis,
    Pipeline,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::SpeechToText => "speech-to-text",
            Stage::Translation => "translation",
            Stage::SpeechSynthesis => "speech-synthesis",
            Stage::Pipeline => "pipeline",
        }
    }
}

pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    pub id: String,
    pub timestamp: i64,
    pub stage: Stage,
    pub latency_ms: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl MetricEvent {
    /// Failures carry `"success": false`.
    pub fn succeeded(&self) -> bool {
        self.metadata
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }

    /// Zero-latency session-start markers carry `"status": "started"`.
    pub fn is_marker(&self) -> bool {
        self.metadata.get("status").and_then(|v| v.as_str()) == Some("started")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub count: usize,
    pub failures: usize,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

pub struct MetricsRecorder {
    events: Mutex<VecDeque<MetricEvent>>,
    capacity: usize,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    network: NetworkSignal,
}

impl MetricsRecorder {
    /// Load persisted events; an unreadable record starts the buffer empty.
    pub fn new(
        capacity: usize,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        network: NetworkSignal,
    ) -> Self {
        let capacity = capacity.max(1);
        let mut events: VecDeque<MetricEvent> =
            match load_record::<Vec<MetricEvent>>(store.as_ref(), record_keys::METRICS) {
                Ok(Some(events)) => events.into(),
                Ok(None) => VecDeque::new(),
                Err(e) => {
                    warn!(error = %e, "metrics load failed, starting empty");
                    VecDeque::new()
                }
            };
        while events.len() > capacity {
            events.pop_front();
        }
        Self {
            events: Mutex::new(events),
            capacity,
            store,
            clock,
            network,
        }
    }

    /// Run `operation`, record its latency under `stage`, and hand back its
    /// result untouched.
    pub async fn measure<T, E, F>(&self, stage: Stage, mut metadata: Metadata, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        let result = operation.await;
        let latency_ms = start.elapsed().as_millis() as u64;

        metadata.insert("success".into(), result.is_ok().into());
        if let Err(e) = &result {
            metadata.insert("error".into(), e.to_string().into());
        }
        self.record(stage, latency_ms, metadata);
        result
    }

    /// Append an event directly (e.g. speech-to-text session boundaries).
    pub fn record(&self, stage: Stage, latency_ms: u64, mut metadata: Metadata) {
        metadata
            .entry("online")
            .or_insert_with(|| (!self.network.is_offline()).into());
        let event = MetricEvent {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: self.clock.now_millis(),
            stage,
            latency_ms,
            metadata,
        };
        debug!(stage = stage.as_str(), latency_ms, "metric_recorded");

        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        self.persist(&events);
    }

    /// Snapshot, oldest first.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        let mut events = self.events.lock();
        events.clear();
        if let Err(e) = self.store.remove(record_keys::METRICS) {
            warn!(error = %e, "metrics clear failed");
        }
    }

    pub fn summary(&self) -> HashMap<Stage, StageSummary> {
        let events = self.events.lock();
        let mut by_stage: HashMap<Stage, Vec<&MetricEvent>> = HashMap::new();
        for event in events.iter().filter(|e| !e.is_marker()) {
            by_stage.entry(event.stage).or_default().push(event);
        }
        by_stage
            .into_iter()
            .map(|(stage, events)| {
                let mut latencies: Vec<u64> = events.iter().map(|e| e.latency_ms).collect();
                latencies.sort_unstable();
                let total: u64 = latencies.iter().sum();
                let summary = StageSummary {
                    count: latencies.len(),
                    failures: events.iter().filter(|e| !e.succeeded()).count(),
                    mean_ms: total as f64 / latencies.len() as f64,
                    p50_ms: percentile(&latencies, 50.0),
                    p95_ms: percentile(&latencies, 95.0),
                };
                (stage, summary)
            })
            .collect()
    }

    fn persist(&self, events: &VecDeque<MetricEvent>) {
        let (front, back) = events.as_slices();
        let snapshot: Vec<&MetricEvent> = front.iter().chain(back.iter()).collect();
        if let Err(e) = save_record(self.store.as_ref(), record_keys::METRICS, &snapshot) {
            warn!(error = %e, "metrics save failed");
        }
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
