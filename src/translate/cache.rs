//! Translation cache with TTL and write-ordered capacity eviction.
//! Entries live in an LRU keyed by fingerprint; reads use `peek` so recency
//! tracks writes only, and the entry evicted on overflow is always the
//! least-recently-written one. Every mutation writes the whole map through to
//! the record store; storage failures are logged and otherwise ignored.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fingerprint::Fingerprint;
use crate::clock::Clock;
use crate::storage::{load_record, record_keys, save_record, RecordStore};

pub const DEFAULT_CACHE_CAPACITY: usize = 500;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub result_text: String,
    /// Unix millis of the last write.
    pub created_at: i64,
}

/// On-disk form, one per fingerprint, stored oldest write first.
#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    fingerprint: Fingerprint,
    result_text: String,
    created_at: i64,
}

pub struct TranslationCache {
    inner: Mutex<LruCache<Fingerprint, CacheEntry>>,
    ttl_ms: i64,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl TranslationCache {
    pub fn new(
        capacity: usize,
        ttl: Duration,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let mut inner = LruCache::new(capacity);

        match load_record::<Vec<PersistedEntry>>(store.as_ref(), record_keys::TRANSLATION_CACHE) {
            Ok(Some(mut entries)) => {
                // Replay in timestamp order so the LRU order matches write order
                // regardless of how the record was laid out.
                entries.sort_by_key(|e| e.created_at);
                let now = clock.now_millis();
                for entry in entries {
                    if now - entry.created_at > ttl_ms {
                        continue;
                    }
                    inner.put(
                        entry.fingerprint,
                        CacheEntry {
                            result_text: entry.result_text,
                            created_at: entry.created_at,
                        },
                    );
                }
                debug!(entries = inner.len(), "translation cache loaded");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "translation cache load failed, starting empty"),
        }

        Self {
            inner: Mutex::new(inner),
            ttl_ms,
            store,
            clock,
        }
    }

    /// Live entry for `fingerprint`. An expired entry is deleted and reported
    /// as a miss.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let mut cache = self.inner.lock();
        let entry = cache.peek(fingerprint)?;
        if self.clock.now_millis() - entry.created_at <= self.ttl_ms {
            debug!(fingerprint = %fingerprint, "cache hit");
            return Some(entry.clone());
        }
        cache.pop(fingerprint);
        debug!(fingerprint = %fingerprint, "cache entry expired");
        self.persist(&cache);
        None
    }

    /// Upsert with a fresh timestamp; evicts the least-recently-written entry
    /// when a new fingerprint would exceed capacity.
    pub fn put(&self, fingerprint: Fingerprint, result_text: String) {
        let mut cache = self.inner.lock();
        let entry = CacheEntry {
            result_text,
            created_at: self.clock.now_millis(),
        };
        if let Some((evicted, _)) = cache.push(fingerprint.clone(), entry) {
            if evicted != fingerprint {
                debug!(evicted = %evicted, "cache capacity eviction");
            }
        }
        self.persist(&cache);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    // Runs under the map lock so concurrent writers persist in order.
    fn persist(&self, cache: &LruCache<Fingerprint, CacheEntry>) {
        let snapshot: Vec<PersistedEntry> = cache
            .iter()
            .rev()
            .map(|(fingerprint, entry)| PersistedEntry {
                fingerprint: fingerprint.clone(),
                result_text: entry.result_text.clone(),
                created_at: entry.created_at,
            })
            .collect();
        if let Err(e) = save_record(self.store.as_ref(), record_keys::TRANSLATION_CACHE, &snapshot) {
            warn!(error = %e, "translation cache save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{FailingStore, SqliteStore};

    const DAY_MS: i64 = 24 * 3600 * 1000;

    fn fp(n: usize) -> Fingerprint {
        Fingerprint::compute(&format!("text {n}"), "en-US", "hi-IN")
    }

    fn cache_with(
        capacity: usize,
        store: Arc<dyn RecordStore>,
        clock: Arc<ManualClock>,
    ) -> TranslationCache {
        TranslationCache::new(capacity, DEFAULT_CACHE_TTL, store, clock)
    }

    #[test]
    fn put_then_get_round_trips() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(10, Arc::new(SqliteStore::in_memory().unwrap()), clock);
        let key = Fingerprint::compute("Hello", "en-US", "hi-IN");
        cache.put(key.clone(), "नमस्ते".into());
        assert_eq!(cache.get(&key).unwrap().result_text, "नमस्ते");
    }

    #[test]
    fn expired_entry_is_a_miss_and_deleted() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(10, Arc::new(SqliteStore::in_memory().unwrap()), Arc::clone(&clock));
        cache.put(fp(1), "one".into());

        clock.set_millis(7 * DAY_MS);
        assert!(cache.get(&fp(1)).is_some());

        clock.advance_millis(1);
        assert!(cache.get(&fp(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn oversized_ttl_saturates_instead_of_expiring_everything() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = TranslationCache::new(
            10,
            Duration::from_secs(u64::MAX),
            Arc::new(SqliteStore::in_memory().unwrap()),
            clock.clone(),
        );
        cache.put(fp(1), "one".into());
        clock.set_millis(3650 * DAY_MS);
        assert_eq!(cache.get(&fp(1)).unwrap().result_text, "one");
    }

    #[test]
    fn rewrite_refreshes_timestamp() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(10, Arc::new(SqliteStore::in_memory().unwrap()), Arc::clone(&clock));
        cache.put(fp(1), "one".into());
        clock.set_millis(6 * DAY_MS);
        cache.put(fp(1), "uno".into());
        clock.set_millis(10 * DAY_MS);

        let entry = cache.get(&fp(1)).unwrap();
        assert_eq!(entry.result_text, "uno");
        assert_eq!(entry.created_at, 6 * DAY_MS);
    }

    #[test]
    fn five_hundred_first_entry_evicts_oldest_write() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(
            DEFAULT_CACHE_CAPACITY,
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::clone(&clock),
        );
        for n in 0..DEFAULT_CACHE_CAPACITY {
            clock.advance_millis(1);
            cache.put(fp(n), format!("r{n}"));
        }
        // Reads must not protect an entry from eviction.
        assert!(cache.get(&fp(0)).is_some());

        clock.advance_millis(1);
        cache.put(fp(DEFAULT_CACHE_CAPACITY), "newest".into());

        assert_eq!(cache.len(), DEFAULT_CACHE_CAPACITY);
        assert!(cache.get(&fp(0)).is_none());
        assert!(cache.get(&fp(1)).is_some());
        assert!(cache.get(&fp(DEFAULT_CACHE_CAPACITY)).is_some());
    }

    #[test]
    fn reload_preserves_write_order_for_eviction() {
        let clock = Arc::new(ManualClock::new(0));
        let backing: Arc<dyn RecordStore> = Arc::new(SqliteStore::in_memory().unwrap());
        {
            let cache = cache_with(3, Arc::clone(&backing), Arc::clone(&clock));
            for n in 0..3 {
                clock.advance_millis(10);
                cache.put(fp(n), format!("r{n}"));
            }
            clock.advance_millis(10);
            cache.put(fp(0), "r0 again".into());
        }

        let cache = cache_with(3, backing, Arc::clone(&clock));
        assert_eq!(cache.len(), 3);
        clock.advance_millis(10);
        cache.put(fp(3), "r3".into());
        assert!(cache.get(&fp(1)).is_none());
        assert_eq!(cache.get(&fp(0)).unwrap().result_text, "r0 again");
    }

    #[test]
    fn expired_entries_are_dropped_on_load() {
        let clock = Arc::new(ManualClock::new(0));
        let backing: Arc<dyn RecordStore> = Arc::new(SqliteStore::in_memory().unwrap());
        cache_with(10, Arc::clone(&backing), Arc::clone(&clock)).put(fp(1), "old".into());

        clock.set_millis(8 * DAY_MS);
        assert!(cache_with(10, backing, clock).is_empty());
    }

    #[test]
    fn storage_failure_degrades_to_memory_only() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(10, Arc::new(FailingStore), clock);
        assert!(cache.is_empty());
        cache.put(fp(1), "one".into());
        assert_eq!(cache.get(&fp(1)).unwrap().result_text, "one");
    }
}
