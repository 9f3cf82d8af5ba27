//! Persisted view preferences (the last saved filter state).
//!
//! Stored as JSON in the store's `config` table under
//! [`PREFERENCES_KEY`]. The payload carries an explicit version; anything
//! missing, unparseable, or from another version loads the defaults.

use crate::Result;
use crate::query::FilterState;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};

/// Key of the saved preferences in the config table.
pub const PREFERENCES_KEY: &str = "view.preferences";

/// Version written by this build.
pub const PREFERENCES_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewPreferences {
    pub version: u32,
    pub filters: FilterState,
}

impl Default for ViewPreferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            filters: FilterState::default(),
        }
    }
}

impl ViewPreferences {
    pub fn new(filters: FilterState) -> Self {
        Self {
            version: PREFERENCES_VERSION,
            filters,
        }
    }

    /// Decode a stored payload, falling back to defaults.
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str::<ViewPreferences>(raw) {
            Ok(prefs) if prefs.version == PREFERENCES_VERSION => prefs,
            Ok(prefs) => {
                tracing::warn!(
                    version = prefs.version,
                    "ignoring saved preferences from another version"
                );
                Self::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable saved preferences");
                Self::default()
            }
        }
    }

    /// Load saved preferences.
    pub fn load(storage: &Storage) -> Result<Self> {
        Ok(storage
            .get_config(PREFERENCES_KEY)?
            .map(|raw| Self::decode(&raw))
            .unwrap_or_default())
    }

    pub fn save(&self, storage: &mut Storage) -> Result<()> {
        let json = serde_json::to_string(self)?;
        storage.set_config(PREFERENCES_KEY, &json)
    }

    /// Forget saved preferences. Returns whether any were stored.
    pub fn clear(storage: &mut Storage) -> Result<bool> {
        storage.delete_config(PREFERENCES_KEY)
    }
}
