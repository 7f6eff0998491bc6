//! Client-local key/value storage
//!
//! Stands in for the browser's local storage: string keys, string values,
//! synchronous access. `FileLocalStorage` writes a JSON object to disk on
//! every change; `MemoryLocalStorage` keeps one per API session.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key of the feed watermark
pub const LAST_SEEN_FEED_KEY: &str = "lastSeenFeed";
/// Key of the planned-baths watermark
pub const LAST_SEEN_PLANNED_KEY: &str = "lastSeenPlanned";
/// One-shot flag set after sign-up
pub const ONBOARDING_KEY: &str = "badekompis_needs_onboarding";
/// Bearer token kept by the terminal client
pub const TOKEN_KEY: &str = "badekompis_token";

#[derive(Debug, thiserror::Error)]
pub enum LocalStorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed storage file: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub trait LocalStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStorageError>;

    fn remove(&self, key: &str) -> Result<(), LocalStorageError>;
}

/// In-memory storage
#[derive(Debug, Default)]
pub struct MemoryLocalStorage {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryLocalStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryLocalStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStorageError> {
        self.values
            .lock()
            .map_err(|e| LocalStorageError::Lock(e.to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStorageError> {
        self.values
            .lock()
            .map_err(|e| LocalStorageError::Lock(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

/// JSON-file storage
#[derive(Debug)]
pub struct FileLocalStorage {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileLocalStorage {
    /// Load the file, starting empty if it does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LocalStorageError> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn write(&self, values: &BTreeMap<String, String>) -> Result<(), LocalStorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn modify(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), LocalStorageError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| LocalStorageError::Lock(e.to_string()))?;
        change(&mut values);
        self.write(&values)
    }
}

impl LocalStorage for FileLocalStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStorageError> {
        self.modify(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), LocalStorageError> {
        self.modify(|values| {
            values.remove(key);
        })
    }
}
