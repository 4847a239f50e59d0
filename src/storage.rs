use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;

/// Durable string-keyed storage with synchronous access.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub fn default_storage_path() -> Result<PathBuf, StorageError> {
    let home = dirs::home_dir()
        .ok_or_else(|| StorageError::Unavailable("couldn't find home dir".to_string()))?;
    Ok(home.join(".agent-ideas").join("storage.json"))
}

/// Key-value records kept in a single JSON file. Every write rewrites the file
/// through a temporary sibling and an atomic rename to avoid partial writes.
pub struct JsonFileStore {
    storage_path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the file at `storage_path`, creating parent directories. A file
    /// that cannot be parsed is treated as empty and overwritten on the next
    /// write.
    pub fn open(storage_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let storage_path = storage_path.into();
        if let Some(parent) = storage_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::load(storage_path)
    }

    /// Reads the file if it exists and leaves the filesystem untouched
    /// otherwise. Nothing is written until the first `set` or `remove`.
    pub fn load(storage_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let storage_path = storage_path.into();
        let data = if storage_path.exists() {
            let contents = fs::read_to_string(&storage_path)?;
            match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!(path = %storage_path.display(), error = %err, "discarding unreadable storage file");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            storage_path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    fn save(&self, data: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.storage_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = self.storage_path.with_extension("tmp");
        let mut f = File::create(&temp)?;
        let content = serde_json::to_string_pretty(data)?;
        f.write_all(content.as_bytes())?;
        f.sync_all()?;
        fs::rename(temp, &self.storage_path)?;
        Ok(())
    }

    fn with_data<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> Result<T, StorageError> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))?;
        Ok(f(&mut data))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_data(|data| data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_data(|data| {
            let mut next = data.clone();
            next.insert(key.to_string(), value.to_string());
            // only commit in memory once the file write succeeded
            self.save(&next).map(|()| *data = next)
        })?
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_data(|data| {
            if !data.contains_key(key) {
                return Ok(());
            }
            let mut next = data.clone();
            next.remove(key);
            self.save(&next).map(|()| *data = next)
        })?
    }
}

/// Process-local storage for tests and `--ephemeral` runs.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_data<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> Result<T, StorageError> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))?;
        Ok(f(&mut data))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_data(|data| data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_data(|data| {
            data.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_data(|data| {
            data.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.set("aiAgentIdeas", "[]").unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("aiAgentIdeas").unwrap().as_deref(), Some("[]"));
        reopened.remove("aiAgentIdeas").unwrap();
        assert!(reopened.get("aiAgentIdeas").unwrap().is_none());

        let again = JsonFileStore::open(&path).unwrap();
        assert!(again.get("aiAgentIdeas").unwrap().is_none());
    }

    #[test]
    fn unreadable_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.get("anything").unwrap().is_none());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn removing_missing_key_is_fine() {
        let store = MemoryStore::new();
        store.remove("nope").unwrap();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn load_does_not_create_anything() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("missing");
        let store = JsonFileStore::load(parent.join("storage.json")).unwrap();
        assert!(store.get("aiAgentIdeas").unwrap().is_none());
        assert!(!parent.exists());
    }
}
