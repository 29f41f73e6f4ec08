//! Entity managers built on the two storage backends.
//!
//! `EntityManager` owns one `GenericCache` per entity kind. Reads go
//! cache -> document store (running the legacy migration on first access)
//! and fail soft to an empty result. Writes go to the document store, then
//! refresh the cache, mirror the collection to the flat backup and publish
//! a `DataChanged` event; they fail loud with an [`EntityError`].
//!
//! The caches live exactly as long as the manager. Call
//! [`EntityManager::shutdown`] to drop them explicitly.
//!
//! No multi-step write is transactional: two concurrent saves of the same
//! id resolve last-write-wins in the document store.

mod beans;
mod equipment;
mod method;
mod mirror;
mod transfer;

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::{CacheOptions, CacheStats, GenericCache};
use crate::config::Config;
use crate::error::{EntityError, EntityResult, StorageContext, StorageResult};
use crate::events::EventBus;
use crate::migration::{MigrationCoordinator, MigrationReport, MigrationState};
use crate::models::{BrewingNote, CoffeeBean, Equipment, Method};
use crate::store::{DocumentStore, KeyValueStore, SCHEMA};

pub use method::dedupe_methods;
pub use mirror::BackupReplica;
pub use transfer::EquipmentExport;

/// Cache key for whole-collection entries.
const ALL_KEY: &str = "all";

/// Cache statistics for every entity kind.
#[derive(Debug, Clone, Default)]
pub struct ManagerCacheStats {
    pub equipment: CacheStats,
    pub methods: CacheStats,
    pub beans: CacheStats,
    pub notes: CacheStats,
}

pub struct EntityManager {
    docs: Arc<DocumentStore>,
    backup: BackupReplica,
    migration: Arc<MigrationCoordinator>,
    events: EventBus,
    equipment_cache: Mutex<GenericCache<Vec<Equipment>>>,
    method_cache: Mutex<GenericCache<Vec<Method>>>,
    bean_cache: Mutex<GenericCache<Vec<CoffeeBean>>>,
    note_cache: Mutex<GenericCache<Vec<BrewingNote>>>,
}

impl EntityManager {
    pub fn new(
        kv: Arc<KeyValueStore>,
        docs: Arc<DocumentStore>,
        events: EventBus,
        cache: CacheOptions,
    ) -> Self {
        let migration = Arc::new(MigrationCoordinator::new(Arc::clone(&kv), Arc::clone(&docs)));
        Self {
            docs,
            backup: BackupReplica::new(kv),
            migration,
            events,
            equipment_cache: Mutex::new(new_cache("equipment", &cache)),
            method_cache: Mutex::new(new_cache("methods", &cache)),
            bean_cache: Mutex::new(new_cache("beans", &cache)),
            note_cache: Mutex::new(new_cache("notes", &cache)),
        }
    }

    /// Manager over in-memory backends, used by tests and previews.
    pub fn in_memory() -> Self {
        let events = EventBus::new();
        Self::new(
            Arc::new(KeyValueStore::in_memory(events.clone())),
            Arc::new(DocumentStore::in_memory(SCHEMA)),
            events,
            CacheOptions::default(),
        )
    }

    /// Manager over the file backends under the configured data directory.
    pub fn open(config: &Config, events: EventBus) -> anyhow::Result<Self> {
        let kv = KeyValueStore::open_file(config.preferences_path()?, events.clone())?;
        let docs = DocumentStore::open(config.documents_dir()?, SCHEMA)?;
        Ok(Self::new(
            Arc::new(kv),
            Arc::new(docs),
            events,
            CacheOptions::from(&config.cache),
        ))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn migration(&self) -> &MigrationCoordinator {
        &self.migration
    }

    pub fn migration_state(&self) -> MigrationState {
        self.migration.state()
    }

    /// Run the legacy migration now instead of on first read.
    pub async fn migrate(&self) -> StorageResult<MigrationReport> {
        self.migration.ensure_migrated().await
    }

    /// Migration guard for the read and write paths. Errors are logged; the
    /// caller proceeds with whatever the document store holds.
    async fn ensure_migrated(&self) {
        if self.migration.state() == MigrationState::Migrated {
            return;
        }
        match self.migration.ensure_migrated().await {
            Ok(report) if !report.is_complete() => {
                warn!(failed = ?report.failed, "Legacy migration partially failed")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Legacy migration failed"),
        }
    }

    pub async fn cache_stats(&self) -> ManagerCacheStats {
        ManagerCacheStats {
            equipment: self.equipment_cache.lock().await.get_stats(),
            methods: self.method_cache.lock().await.get_stats(),
            beans: self.bean_cache.lock().await.get_stats(),
            notes: self.note_cache.lock().await.get_stats(),
        }
    }

    /// Periodic sweep of expired cache entries. Returns how many were removed.
    pub async fn cleanup_caches(&self) -> usize {
        self.equipment_cache.lock().await.cleanup()
            + self.method_cache.lock().await.cleanup()
            + self.bean_cache.lock().await.cleanup()
            + self.note_cache.lock().await.cleanup()
    }

    /// Drop every cached entry. The manager stays usable; caches refill on demand.
    pub async fn shutdown(&self) {
        self.equipment_cache.lock().await.clear();
        self.method_cache.lock().await.clear();
        self.bean_cache.lock().await.clear();
        self.note_cache.lock().await.clear();
        debug!("Entity caches cleared");
    }

    /// Read a whole collection, mirror it to `flat_key` and announce the change.
    async fn publish_collection<T>(&self, collection: &str, flat_key: &str) -> EntityResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let records = self
            .docs
            .table::<T>(collection)
            .to_array()
            .await
            .with_context(|| format!("Failed to read back {}", collection))?;
        self.backup.mirror(flat_key, &records).await;
        self.events.data_changed(flat_key);
        Ok(records)
    }
}

fn new_cache<T>(name: &'static str, options: &CacheOptions) -> GenericCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    GenericCache::new(options.clone()).with_eviction_callback(Box::new(move |key: &str, _: &T| {
        debug!(cache = name, key, "Cache entry evicted");
    }))
}

fn require_name(entity: &str, name: &str) -> EntityResult<()> {
    if name.trim().is_empty() {
        return Err(EntityError::Validation(format!("{} name is required", entity)));
    }
    Ok(())
}
