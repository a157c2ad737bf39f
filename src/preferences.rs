//! Playback preferences (volume, speech rate), persisted as their own record.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::{load_record, record_keys, save_record, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Gain in [0, 1].
    pub volume: f32,
    /// Speech rate multiplier in [0.5, 2].
    pub rate: f32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            volume: 1.0,
            rate: 1.0,
        }
    }
}

impl Preferences {
    fn clamped(self) -> Self {
        Self {
            volume: clamp_or(self.volume, 0.0, 1.0, 1.0),
            rate: clamp_or(self.rate, 0.5, 2.0, 1.0),
        }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

pub struct PreferencesStore {
    current: RwLock<Preferences>,
    store: Arc<dyn RecordStore>,
}

impl PreferencesStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let current = match load_record::<Preferences>(store.as_ref(), record_keys::PREFERENCES) {
            Ok(Some(prefs)) => prefs.clamped(),
            Ok(None) => Preferences::default(),
            Err(e) => {
                warn!(error = %e, "preferences load failed, using defaults");
                Preferences::default()
            }
        };
        Self {
            current: RwLock::new(current),
            store,
        }
    }

    pub fn get(&self) -> Preferences {
        *self.current.read()
    }

    pub fn set_volume(&self, volume: f32) -> Preferences {
        self.update(|prefs| prefs.volume = volume)
    }

    pub fn set_rate(&self, rate: f32) -> Preferences {
        self.update(|prefs| prefs.rate = rate)
    }

    fn update(&self, apply: impl FnOnce(&mut Preferences)) -> Preferences {
        let mut current = self.current.write();
        apply(&mut current);
        *current = current.clamped();
        if let Err(e) = save_record(self.store.as_ref(), record_keys::PREFERENCES, &*current) {
            warn!(error = %e, "preferences save failed");
        }
        info!(volume = current.volume, rate = current.rate, "preferences updated");
        *current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    #[test]
    fn values_are_clamped_and_persisted() {
        let backing: Arc<dyn RecordStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let prefs = PreferencesStore::new(Arc::clone(&backing));
        assert_eq!(prefs.get(), Preferences::default());

        assert_eq!(prefs.set_volume(1.7).volume, 1.0);
        assert_eq!(prefs.set_rate(0.1).rate, 0.5);
        prefs.set_volume(0.25);

        let reloaded = PreferencesStore::new(backing);
        assert_eq!(reloaded.get(), Preferences { volume: 0.25, rate: 0.5 });
    }
}
