//! Durable keyed-record store backed by SQLite.
//! Five independent records live here: translation cache, history, metrics,
//! preferences and evaluation results. Each is loaded and saved on its own, so one corrupt
//! record never blocks the others from loading.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Record keys.
pub mod record_keys {
    pub const TRANSLATION_CACHE: &str = "langlink-translation-cache";
    pub const HISTORY: &str = "langlink-history";
    pub const METRICS: &str = "langlink-metrics";
    pub const PREFERENCES: &str = "langlink-preferences";
    pub const EVALUATION_RESULTS: &str = "langlink-eval-results";
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Raw string-valued record storage. Implementations must be safe to share
/// across tasks; callers serialize with [`load_record`] / [`save_record`].
pub trait RecordStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Load and deserialize one record. `Ok(None)` when it was never written.
pub fn load_record<T: DeserializeOwned>(
    store: &dyn RecordStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.load(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn save_record<T: Serialize + ?Sized>(
    store: &dyn RecordStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value)?;
    store.save(key, &raw)
}

/// SQLite-backed record store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;
        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        info!(path = %db_path.display(), "record store opened");
        Ok(store)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                record_key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RecordStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM records WHERE record_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO records (record_key, value, updated_at)
             VALUES (?1, ?2, ?3)",
            params![key, value, now_unix()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM records WHERE record_key = ?1", params![key])?;
        Ok(())
    }
}

/// Current time as Unix timestamp (seconds).
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Store whose every operation fails. Exercises the swallow-and-continue
/// paths of the optimization layers.
#[cfg(test)]
pub(crate) struct FailingStore;

#[cfg(test)]
impl RecordStore for FailingStore {
    fn load(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("disk on fire".into()))
    }

    fn save(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk on fire".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk on fire".into()))
    }
}
