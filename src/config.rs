//! Runtime configuration.
//! Every field has a default; a JSON file and `LANGLINK_*` env vars can
//! override them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Quiet period before a text change fires a translation.
    pub debounce_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub history_capacity: usize,
    pub metrics_capacity: usize,
    /// SQLite file holding cache, history, metrics and preferences.
    pub db_path: PathBuf,
    pub log_json: bool,
    pub gemini_base_url: String,
    pub translation_model: String,
    pub tts_model: String,
    pub tts_voice: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            cache_ttl_secs: 7 * 24 * 3600,
            cache_capacity: 500,
            history_capacity: 50,
            metrics_capacity: 1000,
            db_path: PathBuf::from("langlink.db"),
            log_json: false,
            gemini_base_url: "https://generativelanguage.googleapis.com".into(),
            translation_model: "gemini-2.5-flash".into(),
            tts_model: "gemini-2.5-flash-preview-tts".into(),
            tts_voice: "Kore".into(),
        }
    }
}

impl Config {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply `LANGLINK_DB_PATH`, `LANGLINK_DEBOUNCE_MS` and `LANGLINK_LOG_JSON`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("LANGLINK_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Ok(raw) = std::env::var("LANGLINK_DEBOUNCE_MS") {
            self.debounce_ms = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "LANGLINK_DEBOUNCE_MS",
                value: raw.clone(),
            })?;
        }
        if let Ok(raw) = std::env::var("LANGLINK_LOG_JSON") {
            self.log_json = matches!(raw.as_str(), "1" | "true" | "yes");
        }
        Ok(self)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("langlink.json");
        std::fs::write(&path, r#"{ "debounce_ms": 250, "history_capacity": 10 }"#).unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.history_capacity, 10);
        assert_eq!(config.cache_capacity, 500);
        assert_eq!(config.cache_ttl(), Duration::from_secs(604_800));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ debounce_ms: ").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
