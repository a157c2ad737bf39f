//! Translation history: bounded, newest-first log of completed translations.
//! History is convenience state. Persistence failures are logged and the
//! in-memory list stays authoritative for the session.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::storage::{load_record, record_keys, save_record, RecordStore};
use crate::translate::Language;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// A single completed translation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Time-ordered UUIDv7.
    pub id: String,
    pub source_language: Language,
    pub target_language: Language,
    pub source_text: String,
    pub translated_text: String,
    pub timestamp: i64,
}

pub struct HistoryStore {
    items: Mutex<VecDeque<HistoryItem>>,
    capacity: usize,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl HistoryStore {
    pub fn new(capacity: usize, store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        let mut items: VecDeque<HistoryItem> =
            match load_record::<Vec<HistoryItem>>(store.as_ref(), record_keys::HISTORY) {
                Ok(Some(items)) => items.into(),
                Ok(None) => VecDeque::new(),
                Err(e) => {
                    warn!(error = %e, "history load failed, starting empty");
                    VecDeque::new()
                }
            };
        items.truncate(capacity);
        Self {
            items: Mutex::new(items),
            capacity,
            store,
            clock,
        }
    }

    /// Build an item stamped with a fresh id and the current time.
    pub fn new_item(
        &self,
        source_language: Language,
        target_language: Language,
        source_text: String,
        translated_text: String,
    ) -> HistoryItem {
        HistoryItem {
            id: uuid::Uuid::now_v7().to_string(),
            source_language,
            target_language,
            source_text,
            translated_text,
            timestamp: self.clock.now_millis(),
        }
    }

    /// Insert at the head, dropping the oldest beyond capacity.
    pub fn append(&self, item: HistoryItem) {
        let mut items = self.items.lock();
        debug!(id = %item.id, "history append");
        items.push_front(item);
        items.truncate(self.capacity);
        self.persist(&items);
    }

    /// Remove one item by id; absent ids are a no-op.
    pub fn remove(&self, id: &str) -> bool {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|item| item.id != id);
        let removed = items.len() != before;
        if removed {
            self.persist(&items);
        }
        removed
    }

    pub fn clear(&self) {
        let mut items = self.items.lock();
        items.clear();
        if let Err(e) = self.store.remove(record_keys::HISTORY) {
            warn!(error = %e, "history clear failed");
        }
    }

    /// Newest first.
    pub fn items(&self) -> Vec<HistoryItem> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<HistoryItem> {
        self.items.lock().iter().find(|item| item.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn persist(&self, items: &VecDeque<HistoryItem>) {
        let (front, back) = items.as_slices();
        let snapshot: Vec<&HistoryItem> = front.iter().chain(back.iter()).collect();
        if let Err(e) = save_record(self.store.as_ref(), record_keys::HISTORY, &snapshot) {
            warn!(error = %e, "history save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{FailingStore, SqliteStore};

    fn english() -> Language {
        Language::new("en-US", "English")
    }

    fn hindi() -> Language {
        Language::new("hi-IN", "Hindi")
    }

    fn store_with(backing: Arc<dyn RecordStore>, capacity: usize) -> HistoryStore {
        HistoryStore::new(capacity, backing, Arc::new(ManualClock::new(0)))
    }

    fn item(history: &HistoryStore, n: usize) -> HistoryItem {
        history.new_item(english(), hindi(), format!("text {n}"), format!("पाठ {n}"))
    }

    #[test]
    fn fifty_first_append_evicts_the_oldest() {
        let history = store_with(Arc::new(SqliteStore::in_memory().unwrap()), 50);
        for n in 0..51 {
            history.append(item(&history, n));
        }
        let items = history.items();
        assert_eq!(items.len(), 50);
        assert_eq!(items[0].source_text, "text 50");
        assert_eq!(items[49].source_text, "text 1");
    }

    #[test]
    fn ids_are_unique_within_one_millisecond() {
        let history = store_with(Arc::new(SqliteStore::in_memory().unwrap()), 50);
        let a = item(&history, 1);
        let b = item(&history, 2);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn remove_and_clear() {
        let history = store_with(Arc::new(SqliteStore::in_memory().unwrap()), 50);
        let first = item(&history, 1);
        let id = first.id.clone();
        history.append(first);
        history.append(item(&history, 2));

        assert!(history.remove(&id));
        assert!(!history.remove(&id));
        assert_eq!(history.len(), 1);
        assert!(history.get(&id).is_none());

        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn persisted_order_survives_reload() {
        let backing: Arc<dyn RecordStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let history = store_with(Arc::clone(&backing), 50);
        history.append(item(&history, 1));
        history.append(item(&history, 2));

        let reloaded = store_with(backing, 50);
        let texts: Vec<String> = reloaded.items().into_iter().map(|i| i.source_text).collect();
        assert_eq!(texts, vec!["text 2", "text 1"]);
    }

    #[test]
    fn storage_failures_are_ignored() {
        let history = store_with(Arc::new(FailingStore), 50);
        history.append(item(&history, 1));
        assert_eq!(history.len(), 1);
        history.clear();
        assert!(history.is_empty());
    }
}
