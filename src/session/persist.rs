//! Persistence of the last applied settings across restarts.

use crate::controls::{ControlRegistry, ControlValue, ControlValues};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct StoredState<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    active_preset: Option<&'a str>,
    settings: &'a BTreeMap<String, ControlValue>,
}

#[derive(Debug, Deserialize)]
struct LoadedState {
    active_preset: Option<String>,
    #[serde(default)]
    settings: BTreeMap<String, serde_json::Value>,
}

/// Settings recovered from the state file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoredState {
    pub values: ControlValues,
    pub active_preset: Option<String>,
}

/// TOML file holding the current control values.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the state file, keeping only entries that still validate.
    ///
    /// A missing or unreadable file yields `None`.
    pub fn load(&self, registry: &ControlRegistry) -> Option<RestoredState> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read state file");
                return None;
            }
        };

        let loaded: LoadedState = match toml::from_str(&contents) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring malformed state file");
                return None;
            }
        };

        let mut values = ControlValues::new();
        for (id, raw) in &loaded.settings {
            match registry.validate(id, raw) {
                Ok(value) => {
                    values.insert(id.clone(), value);
                }
                Err(e) => warn!(error = %e, "Dropping stored setting"),
            }
        }

        info!(path = %self.path.display(), restored = values.len(), "Settings restored");
        Some(RestoredState {
            values,
            active_preset: loaded.active_preset,
        })
    }

    /// Writes the state file, replacing it atomically.
    pub fn save(&self, values: &ControlValues, active_preset: Option<&str>) -> std::io::Result<()> {
        let stored = StoredState {
            active_preset,
            settings: values,
        };
        let contents = toml::to_string(&stored)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("toml.tmp");
        std::fs::write(&temp, contents)?;
        std::fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), "State saved");
        Ok(())
    }
}
