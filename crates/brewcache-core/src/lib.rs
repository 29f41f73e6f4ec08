//! Brewcache - local persistence and caching for brew guide data.
//!
//! This crate stores custom brewing equipment, their methods, coffee beans
//! and brewing notes across two storage backends:
//!
//! - a flat key-value store that held the legacy data and now serves as a
//!   write-only backup replica
//! - a collection-oriented document store, the system of record
//!
//! Legacy data is copied across once, lazily, on first access. Hot entity
//! lists are kept in per-manager in-memory caches with TTL and LRU eviction.
//!
//! ```ignore
//! let manager = EntityManager::open(&Config::load()?, EventBus::new())?;
//! let v60 = manager.save_custom_equipment(Equipment::new("V60", AnimationType::V60)).await?;
//! let methods = manager.load_custom_methods_for_equipment(&v60.id).await;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod migration;
pub mod models;
pub mod store;
pub mod utils;

pub use cache::{CacheOptions, CacheStats, GenericCache};
pub use config::{CacheSettings, Config};
pub use error::{EntityError, EntityResult, StorageError, StorageResult};
pub use events::{EventBus, StoreEvent};
pub use manager::{dedupe_methods, EntityManager, EquipmentExport, ManagerCacheStats};
pub use migration::{MigrationCoordinator, MigrationReport, MigrationState};
pub use models::{AnimationType, BrewingNote, CoffeeBean, Equipment, Method, MethodParams, Stage};
pub use store::{DocumentStore, KeyValueStore};
