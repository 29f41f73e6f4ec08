//! Flat key-value store for small scalar settings and legacy data.
//!
//! `KeyValueStore` is a uniform facade over a [`KvBackend`]. Reads never
//! fail: a missing key or a backend error both come back as `None`.
//! Writes are visible to the very next read on the same store and emit a
//! [`StoreEvent::StorageChanged`](crate::events::StoreEvent) notification.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::events::EventBus;

/// Synchronous storage primitive behind a [`KeyValueStore`].
pub trait KvBackend: Send + Sync {
    /// Name reported as the `source` of change events.
    fn name(&self) -> &'static str;
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
    fn clear(&self) -> StorageResult<()>;
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Process-local backend. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries
            .lock()?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.lock()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.entries.lock()?.clear();
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.lock()?.keys().cloned().collect())
    }
}

/// Single JSON-object file, rewritten on every mutation.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Open the file at `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), keys = entries.len(), "Opened preference file");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KvBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock()?;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            // Keep memory and disk in step
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock()?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let mut entries = self.entries.lock()?;
        entries.clear();
        self.flush(&entries)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.lock()?.keys().cloned().collect())
    }
}

pub struct KeyValueStore {
    backend: Box<dyn KvBackend>,
    events: EventBus,
}

impl KeyValueStore {
    pub fn new(backend: impl KvBackend + 'static, events: EventBus) -> Self {
        Self {
            backend: Box::new(backend),
            events,
        }
    }

    pub fn in_memory(events: EventBus) -> Self {
        Self::new(MemoryBackend::new(), events)
    }

    pub fn open_file(path: impl Into<PathBuf>, events: EventBus) -> StorageResult<Self> {
        Ok(Self::new(FileBackend::open(path)?, events))
    }

    pub fn source(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.get_sync(key)
    }

    pub async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.set_sync(key, value)
    }

    pub async fn remove(&self, key: &str) -> StorageResult<()> {
        self.backend.remove(key)?;
        self.events.storage_changed(key, self.source());
        Ok(())
    }

    pub async fn clear(&self) -> StorageResult<()> {
        self.backend.clear()?;
        self.events.storage_changed("*", self.source());
        Ok(())
    }

    /// All stored keys; empty when the backend cannot be read.
    pub async fn keys(&self) -> Vec<String> {
        match self.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list preference keys");
                Vec::new()
            }
        }
    }

    /// Blocking read for callers that cannot await, such as startup code
    /// running before any async write is scheduled.
    pub fn get_sync(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read preference");
                None
            }
        }
    }

    /// Blocking write, see [`KeyValueStore::get_sync`].
    pub fn set_sync(&self, key: &str, value: &str) -> StorageResult<()> {
        self.backend.set(key, value)?;
        self.events.storage_changed(key, self.source());
        Ok(())
    }

    /// Read and parse a JSON value. Unparseable data is logged and treated as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Failed to parse preference as JSON");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StoreEvent;

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let kv = KeyValueStore::in_memory(EventBus::new());
        assert_eq!(kv.get("nope").await, None);
    }

    #[tokio::test]
    async fn test_set_is_immediately_visible() {
        let kv = KeyValueStore::in_memory(EventBus::new());
        kv.set("brewingNotes", "[]").await.unwrap();
        assert_eq!(kv.get("brewingNotes").await.as_deref(), Some("[]"));
        assert_eq!(kv.get_sync("brewingNotes").as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_remove_clear_and_keys() {
        let kv = KeyValueStore::in_memory(EventBus::new());
        kv.set_sync("a", "1").unwrap();
        kv.set_sync("b", "2").unwrap();
        assert_eq!(kv.keys().await, vec!["a".to_string(), "b".to_string()]);

        kv.remove("a").await.unwrap();
        assert_eq!(kv.get("a").await, None);

        kv.clear().await.unwrap();
        assert!(kv.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_emits_storage_changed() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let kv = KeyValueStore::in_memory(events);
        kv.set("coffeeBeans", "[]").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::StorageChanged {
                key: "coffeeBeans".to_string(),
                source: "memory".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let kv = KeyValueStore::in_memory(EventBus::new());
        kv.set_json("ids", &vec![1, 2, 3]).await.unwrap();
        assert_eq!(kv.get_json::<Vec<i32>>("ids").await, Some(vec![1, 2, 3]));

        kv.set("broken", "{not json").await.unwrap();
        assert_eq!(kv.get_json::<Vec<i32>>("broken").await, None);
    }

    #[test]
    fn test_file_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs").join("preferences.json");

        let kv = KeyValueStore::open_file(&path, EventBus::new()).unwrap();
        kv.set_sync("theme", "dark").unwrap();
        kv.set_sync("grindUnit", "clicks").unwrap();
        drop(kv);

        let reopened = KeyValueStore::open_file(&path, EventBus::new()).unwrap();
        assert_eq!(reopened.get_sync("theme").as_deref(), Some("dark"));
        assert_eq!(reopened.source(), "file");
    }
}
