//! Key-value store implementations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::SyncError;

/// Persistent string storage shared by every tab of the same origin.
///
/// `get`/`set` are not atomic across processes; concurrent writers can race
/// on read-modify-write sequences. Callers that care (the quota tracker)
/// treat their counters as advisory.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SyncError::Storage("kv store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SyncError::Storage("kv store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One file per key under a cache directory.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: PathBuf) -> Result<Self, SyncError> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| SyncError::Storage(format!("Failed to create cache dir: {}", e)))?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        // Keys are namespaced flat strings; sanitize anything path-like.
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| SyncError::Storage(format!("Failed to read {}: {}", key, e)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        std::fs::write(self.path(key), value)
            .map_err(|e| SyncError::Storage(format!("Failed to write {}: {}", key, e)))
    }
}
