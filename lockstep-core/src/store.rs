//! Persistent key-value store for per-project state.
//!
//! Values are grouped by namespace. The JSON backend persists a
//! [`StateFile`] document at `<project>/.lockstep/state.json`; writes use
//! the `.tmp` + rename pattern so readers never observe a torn file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::state_dir;
use crate::error::{store_io_err, StoreError};

pub const STATE_FILE: &str = "state.json";

/// Namespaced string store that survives process restarts.
pub trait PersistentStore {
    /// Returns `Ok(None)` when the key has never been written.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// JSON file backend
// ---------------------------------------------------------------------------

/// On-disk payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub values: BTreeMap<String, BTreeMap<String, String>>,
}

/// [`PersistentStore`] backed by a single JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store rooted at `<project>/.lockstep/state.json`.
    pub fn for_project(project_dir: &Path) -> Self {
        Self::new(state_dir(project_dir).join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole document. Returns an empty document if the file does
    /// not exist yet.
    pub fn load(&self) -> Result<StateFile, StoreError> {
        if !self.path.exists() {
            return Ok(StateFile::default());
        }
        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| store_io_err(&self.path, e))?;
        if contents.trim().is_empty() {
            return Ok(StateFile::default());
        }
        serde_json::from_str(&contents).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, state: &StateFile) -> Result<(), StoreError> {
        let Some(dir) = self.path.parent() else {
            return Err(store_io_err(
                &self.path,
                std::io::Error::other("invalid state store path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| store_io_err(dir, e))?;

        let json = serde_json::to_string_pretty(state).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| store_io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| store_io_err(&self.path, e))?;
        Ok(())
    }
}

impl PersistentStore for JsonFileStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let state = self.load()?;
        Ok(state
            .values
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.load()?;
        state
            .values
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        state.updated_at = Some(Utc::now());
        self.save(&state)?;
        tracing::trace!(path = %self.path.display(), namespace, key, "state store updated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Volatile [`PersistentStore`]; used by one-shot runs that must not touch
/// the project and by tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<(String, String), String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .values
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}
