//! Storage backends.
//!
//! Two incompatible backends hold the same data:
//! - `KeyValueStore`: small flat string store. Held the legacy data and is
//!   now a write-only backup replica.
//! - `DocumentStore`: collection store, the system of record once the
//!   legacy data has been migrated.

pub mod document;
pub mod kv;

pub use document::{Collection, CollectionSchema, DocumentStore, Table};
pub use kv::{FileBackend, KeyValueStore, KvBackend, MemoryBackend};

// ===== Flat key namespace =====

pub const KEY_COFFEE_BEANS: &str = "coffeeBeans";
pub const KEY_BREWING_NOTES: &str = "brewingNotes";
pub const KEY_CUSTOM_EQUIPMENTS: &str = "customEquipments";
/// Legacy combined map of equipment id to methods.
pub const KEY_CUSTOM_METHODS: &str = "customMethods";
/// Prefix of the per-equipment method keys.
pub const KEY_CUSTOM_METHODS_PREFIX: &str = "customMethods_";

/// Flat key holding the methods of one equipment.
pub fn methods_key(equipment_id: &str) -> String {
    format!("{}{}", KEY_CUSTOM_METHODS_PREFIX, equipment_id)
}

// ===== Document collections =====

pub const COFFEE_BEANS: CollectionSchema = CollectionSchema::new("coffeeBeans", "id");
pub const BREWING_NOTES: CollectionSchema = CollectionSchema::new("brewingNotes", "id");
pub const CUSTOM_EQUIPMENTS: CollectionSchema = CollectionSchema::new("customEquipments", "id");
pub const CUSTOM_METHODS: CollectionSchema = CollectionSchema::new("customMethods", "equipmentId");
pub const SETTINGS: CollectionSchema = CollectionSchema::new("settings", "key");

/// Every collection the persistence layer uses.
pub const SCHEMA: &[CollectionSchema] = &[
    COFFEE_BEANS,
    BREWING_NOTES,
    CUSTOM_EQUIPMENTS,
    CUSTOM_METHODS,
    SETTINGS,
];
