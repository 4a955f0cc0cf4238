//! Persisted `enabled` flag.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

/// Error type for state stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State file '{path}' could not be accessed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("State file is malformed: {0}")]
    Format(#[source] serde_json::Error),
}

pub trait StateStore {
    /// `Ok(None)` when the flag was never written.
    fn load_enabled(&self) -> Result<Option<bool>, StoreError>;

    fn save_enabled(&mut self, enabled: bool) -> Result<(), StoreError>;
}

/// The effective flag: a missing or unreadable value means enabled.
pub fn effective_enabled<S: StateStore + ?Sized>(store: &S) -> bool {
    match store.load_enabled() {
        Ok(flag) => flag.unwrap_or(true),
        Err(e) => {
            warn!("{e}; assuming enabled");
            true
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    enabled: Option<bool>,
}

impl MemoryStateStore {
    pub fn new(enabled: Option<bool>) -> Self {
        Self { enabled }
    }
}

impl StateStore for MemoryStateStore {
    fn load_enabled(&self) -> Result<Option<bool>, StoreError> {
        Ok(self.enabled)
    }

    fn save_enabled(&mut self, enabled: bool) -> Result<(), StoreError> {
        self.enabled = Some(enabled);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
}

/// `{"enabled": bool}` stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for FileStateStore {
    fn load_enabled(&self) -> Result<Option<bool>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let state: PersistedState = serde_json::from_str(&text).map_err(StoreError::Format)?;
        Ok(state.enabled)
    }

    fn save_enabled(&mut self, enabled: bool) -> Result<(), StoreError> {
        let state = PersistedState { enabled: Some(enabled) };
        let text = serde_json::to_string_pretty(&state).map_err(StoreError::Format)?;
        fs::write(&self.path, text).map_err(|e| self.io_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ad-vantage-{}-{name}", std::process::id()))
    }

    #[test]
    fn missing_state_means_enabled() {
        assert!(effective_enabled(&MemoryStateStore::default()));
        assert!(!effective_enabled(&MemoryStateStore::new(Some(false))));

        let store = FileStateStore::new(temp_path("absent.json"));
        assert_eq!(store.load_enabled().unwrap(), None);
        assert!(effective_enabled(&store));
    }

    #[test]
    fn file_store_round_trip_and_corruption() {
        let path = temp_path("state.json");
        let mut store = FileStateStore::new(&path);
        store.save_enabled(false).unwrap();
        assert_eq!(store.load_enabled().unwrap(), Some(false));
        assert!(!effective_enabled(&store));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(store.load_enabled(), Err(StoreError::Format(_))));
        assert!(effective_enabled(&store));

        fs::remove_file(&path).unwrap();
    }
}
