//! Remembered listener preferences (voice and speaking rate).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::voices::{self, DEFAULT_VOICE};
use crate::tts::clamp_rate;

/// Last voice and rate chosen by the listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub voice: String,
    pub rate: f32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self { voice: DEFAULT_VOICE.to_string(), rate: 1.0 }
    }
}

impl Preferences {
    /// Load preferences from `path`, falling back to defaults.
    ///
    /// A missing file is normal on first run; an unreadable or malformed
    /// file is logged and ignored. Values outside the accepted range are
    /// corrected rather than rejected.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("No stored preferences at {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<Self>(&raw) {
            Ok(mut prefs) => {
                if !voices::is_supported(&prefs.voice) {
                    warn!("Stored voice '{}' is no longer available, using {}", prefs.voice, DEFAULT_VOICE);
                    prefs.voice = DEFAULT_VOICE.to_string();
                }
                prefs.rate = clamp_rate(prefs.rate);
                prefs
            }
            Err(e) => {
                warn!("Ignoring malformed preferences file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write preferences to `path`, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write preferences to {}", path.display()))?;
        debug!("Saved preferences to {}", path.display());
        Ok(())
    }
}

/// Default preferences location (~/.read-aloud/preferences.json).
pub fn default_preferences_path() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".read-aloud").join("preferences.json")
    } else {
        PathBuf::from("preferences.json")
    }
}
