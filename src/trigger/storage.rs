/// JSON snapshot persistence for the trigger registry
///
/// The whole registry is written as one document:
/// `{ "triggers": { "<key>": {...} }, "lastUpdated": "<ISO-8601>" }`.
/// Writes go to a temp file first and are renamed into place. A missing file
/// means "no prior state".

use crate::error::PersistenceError;
use crate::trigger::types::{RegisteredTrigger, TriggerSnapshot};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File-backed trigger snapshot store
#[derive(Debug, Clone)]
pub struct TriggerStorage {
    path: PathBuf,
}

impl TriggerStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot; `Ok(None)` when the file does not exist
    pub fn load(&self) -> Result<Option<TriggerSnapshot>, PersistenceError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let snapshot = serde_json::from_slice(&data).map_err(|source| PersistenceError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(snapshot))
    }

    /// Overwrite the snapshot with `triggers`
    pub fn save(
        &self,
        triggers: &BTreeMap<String, RegisteredTrigger>,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let snapshot = TriggerSnapshot {
            triggers: triggers.clone(),
            last_updated: now,
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, &data).map_err(|source| PersistenceError::Io {
            path: temp.clone(),
            source,
        })?;
        std::fs::rename(&temp, &self.path).map_err(|source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!("💾 Saved {} triggers to {}", triggers.len(), self.path.display());
        Ok(())
    }
}
