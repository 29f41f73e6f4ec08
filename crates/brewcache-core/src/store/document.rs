//! Collection-oriented document store.
//!
//! Each collection holds JSON records indexed by a primary key read from the
//! record's `key_path` field. `put` on an existing key replaces the record in
//! place; new keys append, so `to_array` order is stable across a batch.
//! When opened on a directory every collection is mirrored to
//! `<dir>/<collection>.json` after each write.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Name and primary-key field of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: &'static str,
    pub key_path: &'static str,
}

impl CollectionSchema {
    pub const fn new(name: &'static str, key_path: &'static str) -> Self {
        Self { name, key_path }
    }
}

#[derive(Debug, Clone)]
struct CollectionData {
    key_path: &'static str,
    records: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl CollectionData {
    fn new(key_path: &'static str) -> Self {
        Self {
            key_path,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn primary_key(&self, collection: &str, record: &Value) -> StorageResult<String> {
        match record.get(self.key_path) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(StorageError::MissingKey {
                collection: collection.to_string(),
                key_path: self.key_path.to_string(),
            }),
        }
    }

    fn upsert(&mut self, key: String, record: Value) {
        match self.index.get(&key) {
            Some(&pos) => self.records[pos].1 = record,
            None => {
                self.index.insert(key.clone(), self.records.len());
                self.records.push((key, record));
            }
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        let Some(pos) = self.index.remove(key) else {
            return false;
        };
        self.records.remove(pos);
        for (k, _) in &self.records[pos..] {
            if let Some(i) = self.index.get_mut(k) {
                *i -= 1;
            }
        }
        true
    }

    fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}

pub struct DocumentStore {
    collections: RwLock<HashMap<&'static str, CollectionData>>,
    dir: Option<PathBuf>,
}

impl DocumentStore {
    /// Purely in-memory store with the given collections.
    pub fn in_memory(schemas: &[CollectionSchema]) -> Self {
        let collections = schemas
            .iter()
            .map(|s| (s.name, CollectionData::new(s.key_path)))
            .collect();
        Self {
            collections: RwLock::new(collections),
            dir: None,
        }
    }

    /// Store backed by one JSON file per collection under `dir`.
    pub fn open(dir: impl Into<PathBuf>, schemas: &[CollectionSchema]) -> StorageResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut collections = HashMap::new();
        for schema in schemas {
            let mut data = CollectionData::new(schema.key_path);
            let path = collection_path(&dir, schema.name);
            if path.exists() {
                let contents = std::fs::read_to_string(&path)?;
                let records: Vec<Value> = serde_json::from_str(&contents)?;
                for record in records {
                    let key = data.primary_key(schema.name, &record)?;
                    data.upsert(key, record);
                }
                debug!(collection = schema.name, count = data.records.len(), "Loaded collection");
            }
            collections.insert(schema.name, data);
        }

        Ok(Self {
            collections: RwLock::new(collections),
            dir: Some(dir),
        })
    }

    pub fn collection(&self, name: &str) -> Collection<'_> {
        Collection {
            store: self,
            name: name.to_string(),
        }
    }

    /// Typed view over a collection.
    pub fn table<T>(&self, name: &str) -> Table<'_, T> {
        Table {
            inner: self.collection(name),
            _marker: PhantomData,
        }
    }

    fn persist(&self, name: &str, data: &CollectionData) -> StorageResult<()> {
        let Some(ref dir) = self.dir else {
            return Ok(());
        };
        let records: Vec<&Value> = data.records.iter().map(|(_, v)| v).collect();
        let contents = serde_json::to_string_pretty(&records)?;
        let path = collection_path(dir, name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn collection_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", name))
}

/// Handle on a single collection of raw JSON records.
pub struct Collection<'a> {
    store: &'a DocumentStore,
    name: String,
}

impl Collection<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn put(&self, record: Value) -> StorageResult<()> {
        self.bulk_put(vec![record]).await
    }

    /// Upsert every record. The batch is validated before anything is written.
    pub async fn bulk_put(&self, records: Vec<Value>) -> StorageResult<()> {
        let mut collections = self.store.collections.write().await;
        let data = collections
            .get_mut(self.name.as_str())
            .ok_or_else(|| StorageError::UnknownCollection(self.name.clone()))?;

        let keyed = records
            .into_iter()
            .map(|r| data.primary_key(&self.name, &r).map(|k| (k, r)))
            .collect::<StorageResult<Vec<_>>>()?;
        let mut staged = data.clone();
        for (key, record) in keyed {
            staged.upsert(key, record);
        }
        self.commit(data, staged)
    }

    pub async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let collections = self.store.collections.read().await;
        let data = collections
            .get(self.name.as_str())
            .ok_or_else(|| StorageError::UnknownCollection(self.name.clone()))?;
        Ok(data.index.get(key).map(|&pos| data.records[pos].1.clone()))
    }

    pub async fn to_array(&self) -> StorageResult<Vec<Value>> {
        let collections = self.store.collections.read().await;
        let data = collections
            .get(self.name.as_str())
            .ok_or_else(|| StorageError::UnknownCollection(self.name.clone()))?;
        Ok(data.records.iter().map(|(_, v)| v.clone()).collect())
    }

    pub async fn count(&self) -> StorageResult<usize> {
        let collections = self.store.collections.read().await;
        collections
            .get(self.name.as_str())
            .map(|data| data.records.len())
            .ok_or_else(|| StorageError::UnknownCollection(self.name.clone()))
    }

    /// Remove the record at `key`. Returns whether anything was removed.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut collections = self.store.collections.write().await;
        let data = collections
            .get_mut(self.name.as_str())
            .ok_or_else(|| StorageError::UnknownCollection(self.name.clone()))?;
        if !data.index.contains_key(key) {
            return Ok(false);
        }
        let mut staged = data.clone();
        staged.remove(key);
        self.commit(data, staged)?;
        Ok(true)
    }

    pub async fn clear(&self) -> StorageResult<()> {
        let mut collections = self.store.collections.write().await;
        let data = collections
            .get_mut(self.name.as_str())
            .ok_or_else(|| StorageError::UnknownCollection(self.name.clone()))?;
        let mut staged = data.clone();
        staged.clear();
        self.commit(data, staged)
    }

    /// Persist `staged` and only then make it the live collection, so a
    /// failed write leaves memory and disk unchanged.
    fn commit(&self, live: &mut CollectionData, staged: CollectionData) -> StorageResult<()> {
        self.store.persist(&self.name, &staged)?;
        *live = staged;
        Ok(())
    }
}

/// Collection handle that (de)serializes records as `T`.
pub struct Table<'a, T> {
    inner: Collection<'a>,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> Table<'_, T> {
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn put(&self, record: &T) -> StorageResult<()> {
        self.inner.put(serde_json::to_value(record)?).await
    }

    pub async fn bulk_put(&self, records: &[T]) -> StorageResult<()> {
        let values = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.inner.bulk_put(values).await
    }

    pub async fn get(&self, key: &str) -> StorageResult<Option<T>> {
        match self.inner.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Every record that deserializes as `T`. Unreadable records are logged
    /// and left out; they stay untouched in the collection.
    pub async fn to_array(&self) -> StorageResult<Vec<T>> {
        let records = self.inner.to_array().await?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_value(record) {
                Ok(value) => out.push(value),
                Err(e) => warn!(collection = self.name(), error = %e, "Skipping unreadable record"),
            }
        }
        Ok(out)
    }

    pub async fn count(&self) -> StorageResult<usize> {
        self.inner.count().await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(key).await
    }

    pub async fn clear(&self) -> StorageResult<()> {
        self.inner.clear().await
    }
}
