//! Human-rated translation evaluation.
//!
//! A fixed domain-tagged dataset (English into Indian languages) is run item
//! by item through the normal translation path, timed, and rated 1 to 5 by a
//! reviewer. Ratings are kept in their own record so a corrupt evaluation
//! log never affects the cache, history or metrics. The dashboard combines
//! per-stage latency stats with the average rating.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::metrics::{Metadata, MetricsRecorder, Stage, StageSummary};
use crate::storage::{load_record, record_keys, save_record, RecordStore};
use crate::translate::{Language, TranslationRequest, TranslationService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Healthcare,
    Travel,
    Education,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationItem {
    pub id: &'static str,
    pub domain: Domain,
    pub source_text: &'static str,
    pub target_code: &'static str,
    pub target_name: &'static str,
}

impl EvaluationItem {
    const fn new(
        id: &'static str,
        domain: Domain,
        source_text: &'static str,
        target_code: &'static str,
        target_name: &'static str,
    ) -> Self {
        Self {
            id,
            domain,
            source_text,
            target_code,
            target_name,
        }
    }

    pub fn request(&self) -> TranslationRequest {
        TranslationRequest::new(
            self.source_text,
            Language::new("en-US", "English"),
            Language::new(self.target_code, self.target_name),
        )
    }
}

pub const EVALUATION_DATASET: &[EvaluationItem] = &[
    EvaluationItem::new("hc-1", Domain::Healthcare, "Where is the nearest pharmacy?", "hi-IN", "Hindi"),
    EvaluationItem::new("hc-2", Domain::Healthcare, "I have a severe headache and fever.", "ta-IN", "Tamil"),
    EvaluationItem::new("hc-3", Domain::Healthcare, "Do I need a prescription for this medicine?", "bn-IN", "Bengali"),
    EvaluationItem::new("hc-4", Domain::Healthcare, "Please call an ambulance immediately.", "te-IN", "Telugu"),
    EvaluationItem::new("tr-1", Domain::Travel, "How much does a ticket to Mumbai cost?", "mr-IN", "Marathi"),
    EvaluationItem::new("tr-2", Domain::Travel, "Can you recommend a good vegetarian restaurant?", "gu-IN", "Gujarati"),
    EvaluationItem::new("tr-3", Domain::Travel, "I have lost my luggage at the airport.", "kn-IN", "Kannada"),
    EvaluationItem::new("tr-4", Domain::Travel, "Is this train going to Delhi?", "pa-IN", "Punjabi"),
    EvaluationItem::new("ed-1", Domain::Education, "Mathematics is my favorite subject.", "ml-IN", "Malayalam"),
    EvaluationItem::new("ed-2", Domain::Education, "What represents the flag of India?", "hi-IN", "Hindi"),
    EvaluationItem::new("ed-3", Domain::Education, "The library is open from 9 AM to 5 PM.", "or-IN", "Oriya"),
    EvaluationItem::new("gn-1", Domain::General, "Hello, how are you doing today?", "hi-IN", "Hindi"),
    EvaluationItem::new("gn-2", Domain::General, "The weather is beautiful this morning.", "as-IN", "Assamese"),
    EvaluationItem::new("gn-3", Domain::General, "I would like to learn more about your culture.", "ur-IN", "Urdu"),
    EvaluationItem::new("gn-4", Domain::General, "Thank you very much for your help.", "sa-IN", "Sanskrit"),
];

pub fn find_item(id: &str) -> Option<&'static EvaluationItem> {
    EVALUATION_DATASET.iter().find(|item| item.id == id)
}

/// One translated item awaiting a rating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRun {
    pub item_id: &'static str,
    /// Translated text, or the failure message when translation failed.
    pub translation: String,
    pub latency_ms: u64,
    pub failed: bool,
}

/// Stored rating for one item run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub item_id: String,
    pub latency_ms: u64,
    pub rating: u8,
    pub translation: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("rating {0} is outside 1..=5")]
    InvalidRating(u8),
}

pub struct EvaluationStore {
    results: Mutex<Vec<EvaluationResult>>,
    store: Arc<dyn RecordStore>,
}

impl EvaluationStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let results = match load_record::<Vec<EvaluationResult>>(
            store.as_ref(),
            record_keys::EVALUATION_RESULTS,
        ) {
            Ok(results) => results.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "evaluation results load failed, starting empty");
                Vec::new()
            }
        };
        Self {
            results: Mutex::new(results),
            store,
        }
    }

    pub fn append(&self, result: EvaluationResult) {
        let mut results = self.results.lock();
        results.push(result);
        if let Err(e) = save_record(self.store.as_ref(), record_keys::EVALUATION_RESULTS, &*results) {
            warn!(error = %e, "evaluation results save failed");
        }
    }

    /// Oldest first.
    pub fn results(&self) -> Vec<EvaluationResult> {
        self.results.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    pub fn average_rating(&self) -> Option<f64> {
        let results = self.results.lock();
        if results.is_empty() {
            return None;
        }
        let total: u32 = results.iter().map(|r| u32::from(r.rating)).sum();
        Some(f64::from(total) / results.len() as f64)
    }

    pub fn clear(&self) {
        self.results.lock().clear();
        if let Err(e) = self.store.remove(record_keys::EVALUATION_RESULTS) {
            warn!(error = %e, "evaluation results clear failed");
        }
    }
}

pub struct EvaluationRunner {
    translations: Arc<TranslationService>,
    metrics: Arc<MetricsRecorder>,
    results: Arc<EvaluationStore>,
    clock: Arc<dyn Clock>,
}

impl EvaluationRunner {
    pub fn new(
        translations: Arc<TranslationService>,
        metrics: Arc<MetricsRecorder>,
        results: Arc<EvaluationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            translations,
            metrics,
            results,
            clock,
        }
    }

    /// Translate one dataset item and time it end to end. A failed
    /// translation is still returned so it can be rated.
    pub async fn run_item(&self, item: &'static EvaluationItem) -> ItemRun {
        let mut metadata = Metadata::new();
        metadata.insert("evaluation_item".into(), item.id.into());
        metadata.insert("domain".into(), serde_json::to_value(item.domain).unwrap_or_default());

        let request = item.request();
        let start = tokio::time::Instant::now();
        let result = self
            .metrics
            .measure(Stage::Pipeline, metadata, self.translations.translate(&request))
            .await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(translation) => ItemRun {
                item_id: item.id,
                translation: translation.text,
                latency_ms,
                failed: false,
            },
            Err(e) => {
                warn!(item = item.id, error = %e, "evaluation item failed");
                ItemRun {
                    item_id: item.id,
                    translation: format!("error: {e}"),
                    latency_ms,
                    failed: true,
                }
            }
        }
    }

    /// Store the reviewer's 1 to 5 rating for `run`.
    pub fn rate(&self, run: ItemRun, rating: u8) -> Result<EvaluationResult, EvaluationError> {
        if !(1..=5).contains(&rating) {
            return Err(EvaluationError::InvalidRating(rating));
        }
        let result = EvaluationResult {
            item_id: run.item_id.to_string(),
            latency_ms: run.latency_ms,
            rating,
            translation: run.translation,
            timestamp: self.clock.now_millis(),
        };
        info!(item = run.item_id, rating, "evaluation rated");
        self.results.append(result.clone());
        Ok(result)
    }

    /// First dataset item without a stored rating.
    pub fn next_unrated(&self) -> Option<&'static EvaluationItem> {
        let rated = self.results.results();
        EVALUATION_DATASET
            .iter()
            .find(|item| !rated.iter().any(|r| r.item_id == item.id))
    }
}

/// Latency stats per stage plus the reviewer rating.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub stages: HashMap<Stage, StageSummary>,
    pub average_rating: Option<f64>,
    pub rated_samples: usize,
}

impl Dashboard {
    pub fn collect(metrics: &MetricsRecorder, results: &EvaluationStore) -> Self {
        Self {
            stages: metrics.summary(),
            average_rating: results.average_rating(),
            rated_samples: results.len(),
        }
    }
}
