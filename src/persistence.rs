use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ServiceResult, StorageError};
use crate::storage::KeyValueStore;
use crate::store::StoreObserver;
use crate::types::{Idea, StoredIdea};

pub const IDEAS_STORAGE_KEY: &str = "aiAgentIdeas";

/// Keeps the text-only projection of the idea collection in durable storage.
pub struct PersistenceAdapter {
    storage: Arc<dyn KeyValueStore>,
    key: String,
}

impl PersistenceAdapter {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            key: IDEAS_STORAGE_KEY.to_string(),
        }
    }

    /// Serializes the durable projection. Image, expansion, scaffold and audio
    /// never leave memory.
    pub fn snapshot(ideas: &[StoredIdea]) -> Result<String, StorageError> {
        Ok(serde_json::to_string(ideas)?)
    }

    pub fn save(&self, ideas: &[StoredIdea]) -> Result<(), StorageError> {
        if ideas.is_empty() {
            debug!(key = %self.key, "removing durable idea record");
            return self.storage.remove(&self.key);
        }
        let snapshot = Self::snapshot(ideas)?;
        self.storage.set(&self.key, &snapshot)
    }

    /// Parses the saved record as it is, without repairing anything. Used by
    /// read-only callers that must not change storage.
    pub fn inspect(&self) -> Result<Vec<StoredIdea>, StorageError> {
        match self.storage.get(&self.key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Reads the previous session's ideas. A record that does not parse is
    /// removed and treated as absent.
    pub fn load(&self) -> Vec<Idea> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(error = %err, "failed to read saved ideas");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<StoredIdea>>(&raw) {
            Ok(stored) => stored.into_iter().map(Idea::from).collect(),
            Err(err) => {
                warn!(error = %err, "discarding corrupt saved ideas");
                if let Err(err) = self.storage.remove(&self.key) {
                    warn!(error = %err, "failed to remove corrupt saved ideas");
                }
                Vec::new()
            }
        }
    }

    /// Drops the durable record without touching any in-memory collection.
    pub fn erase(&self) -> Result<(), StorageError> {
        self.storage.remove(&self.key)
    }
}

impl StoreObserver for PersistenceAdapter {
    fn ideas_changed(&self, ideas: Option<&[StoredIdea]>) -> ServiceResult<()> {
        match ideas {
            Some(ideas) => Ok(self.save(ideas)?),
            None => Ok(()),
        }
    }
}
