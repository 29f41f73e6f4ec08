//! One-shot copy of legacy flat-key data into the document store.
//!
//! The coordinator moves through `NotMigrated -> Migrating -> Migrated`.
//! Completion is recorded as a `migrated = "true"` marker (plus a
//! `migratedAt` timestamp) in the `settings` collection; once the marker is
//! present the copy step never runs again.
//!
//! There is no lock around the copy. Every write is a `bulk_put` upsert by
//! primary key, so an interrupted or concurrent run can simply be repeated.
//! A key that fails to parse is logged and reported, and the marker is left
//! unset so the next run retries it. Keys that did copy get their own
//! `migrated:<key>` row and are not copied again, so a retry never replays
//! stale legacy data over records changed or deleted since.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::models::Setting;
use crate::store::{
    CollectionSchema, DocumentStore, KeyValueStore, BREWING_NOTES, COFFEE_BEANS,
    methods_key, CUSTOM_EQUIPMENTS, CUSTOM_METHODS, KEY_BREWING_NOTES, KEY_COFFEE_BEANS,
    KEY_CUSTOM_EQUIPMENTS, KEY_CUSTOM_METHODS, KEY_CUSTOM_METHODS_PREFIX, SETTINGS,
};

/// Settings key of the completion marker.
pub const MIGRATED_KEY: &str = "migrated";
/// Settings key of the completion timestamp.
pub const MIGRATED_AT_KEY: &str = "migratedAt";
/// Prefix of the per-key rows recording which flat keys have been copied.
pub const MIGRATED_KEY_PREFIX: &str = "migrated:";

/// Flat keys holding plain record arrays, with their target collections.
const RECORD_KEYS: &[(&str, CollectionSchema)] = &[
    (KEY_COFFEE_BEANS, COFFEE_BEANS),
    (KEY_BREWING_NOTES, BREWING_NOTES),
    (KEY_CUSTOM_EQUIPMENTS, CUSTOM_EQUIPMENTS),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NotMigrated,
    Migrating,
    Migrated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// The marker was already set; nothing was copied.
    pub already_migrated: bool,
    /// Flat key and number of records written for it.
    pub migrated: Vec<(String, usize)>,
    /// Flat key and failure reason. Non-empty means the marker was not set.
    pub failed: Vec<(String, String)>,
    /// Records dropped because they had no primary key.
    pub skipped: usize,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total_records(&self) -> usize {
        self.migrated.iter().map(|(_, n)| n).sum()
    }
}

pub struct MigrationCoordinator {
    kv: Arc<KeyValueStore>,
    docs: Arc<DocumentStore>,
    state: Mutex<MigrationState>,
}

impl MigrationCoordinator {
    pub fn new(kv: Arc<KeyValueStore>, docs: Arc<DocumentStore>) -> Self {
        Self {
            kv,
            docs,
            state: Mutex::new(MigrationState::NotMigrated),
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(MigrationState::NotMigrated)
    }

    fn set_state(&self, state: MigrationState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    /// Whether the completion marker is present in the document store.
    pub async fn is_marked(&self) -> StorageResult<bool> {
        let settings = self.docs.table::<Setting>(SETTINGS.name);
        Ok(settings
            .get(MIGRATED_KEY)
            .await?
            .map(|s| s.value == "true")
            .unwrap_or(false))
    }

    /// Run the migration unless it has already completed.
    pub async fn ensure_migrated(&self) -> StorageResult<MigrationReport> {
        if self.state() == MigrationState::Migrated {
            return Ok(MigrationReport {
                already_migrated: true,
                ..MigrationReport::default()
            });
        }
        if self.is_marked().await? {
            debug!("Migration marker present");
            self.set_state(MigrationState::Migrated);
            return Ok(MigrationReport {
                already_migrated: true,
                ..MigrationReport::default()
            });
        }

        self.set_state(MigrationState::Migrating);
        info!("Migrating legacy flat-key data");

        let report = match self.copy_legacy_data().await {
            Ok(report) => report,
            Err(e) => {
                self.set_state(MigrationState::NotMigrated);
                return Err(e);
            }
        };

        if !report.is_complete() {
            warn!(failed = report.failed.len(), "Migration incomplete, will retry on next access");
            self.set_state(MigrationState::NotMigrated);
            return Ok(report);
        }

        if let Err(e) = self.write_marker().await {
            self.set_state(MigrationState::NotMigrated);
            return Err(e);
        }
        self.set_state(MigrationState::Migrated);
        info!(records = report.total_records(), keys = report.migrated.len(), "Migration complete");
        Ok(report)
    }

    async fn write_marker(&self) -> StorageResult<()> {
        let settings = self.docs.table::<Setting>(SETTINGS.name);
        settings
            .bulk_put(&[
                Setting::new(MIGRATED_KEY, "true"),
                Setting::new(MIGRATED_AT_KEY, Utc::now().to_rfc3339()),
            ])
            .await
    }

    async fn copy_legacy_data(&self) -> StorageResult<MigrationReport> {
        let mut report = MigrationReport::default();

        for (key, schema) in RECORD_KEYS {
            if self.key_copied(key).await? {
                continue;
            }
            let Some(raw) = self.kv.get(key).await else {
                continue;
            };
            match parse_records(&raw, schema.key_path) {
                Ok((records, skipped)) => {
                    report.skipped += skipped;
                    self.copy_into(&mut report, key, *schema, records).await?;
                }
                Err(e) => record_failure(&mut report, key, e),
            }
        }

        // Per-equipment keys are newer than the combined map and win over it.
        let method_keys: Vec<String> = self
            .kv
            .keys()
            .await
            .into_iter()
            .filter(|k| k.len() > KEY_CUSTOM_METHODS_PREFIX.len())
            .filter(|k| k.starts_with(KEY_CUSTOM_METHODS_PREFIX))
            .collect();

        if !self.key_copied(KEY_CUSTOM_METHODS).await? {
            if let Some(raw) = self.kv.get(KEY_CUSTOM_METHODS).await {
                match parse_method_map(&raw) {
                    Ok(records) => {
                        let records = records
                            .into_iter()
                            .filter(|r| {
                                let id = r["equipmentId"].as_str().unwrap_or_default();
                                !method_keys.contains(&methods_key(id))
                            })
                            .collect();
                        self.copy_into(&mut report, KEY_CUSTOM_METHODS, CUSTOM_METHODS, records)
                            .await?
                    }
                    Err(e) => record_failure(&mut report, KEY_CUSTOM_METHODS, e),
                }
            }
        }

        for key in method_keys {
            if self.key_copied(&key).await? {
                continue;
            }
            let Some(equipment_id) = key.strip_prefix(KEY_CUSTOM_METHODS_PREFIX) else {
                continue;
            };
            let Some(raw) = self.kv.get(&key).await else {
                continue;
            };
            match serde_json::from_str::<Vec<Value>>(&raw) {
                Ok(methods) => {
                    let record = json!({ "equipmentId": equipment_id, "methods": methods });
                    self.copy_into(&mut report, &key, CUSTOM_METHODS, vec![record])
                        .await?;
                }
                Err(e) => record_failure(&mut report, &key, e.into()),
            }
        }

        Ok(report)
    }

    /// Whether `key` was copied by an earlier, possibly incomplete, run.
    async fn key_copied(&self, key: &str) -> StorageResult<bool> {
        let row = self
            .docs
            .table::<Setting>(SETTINGS.name)
            .get(&format!("{}{}", MIGRATED_KEY_PREFIX, key))
            .await?;
        if row.is_some() {
            debug!(key, "Legacy key already copied");
        }
        Ok(row.is_some())
    }

    async fn mark_copied(&self, key: &str) -> StorageResult<()> {
        self.docs
            .table::<Setting>(SETTINGS.name)
            .put(&Setting::new(format!("{}{}", MIGRATED_KEY_PREFIX, key), "true"))
            .await
    }

    /// `bulk_put` one key's records and confirm they landed.
    async fn copy_into(
        &self,
        report: &mut MigrationReport,
        key: &str,
        schema: CollectionSchema,
        records: Vec<Value>,
    ) -> StorageResult<()> {
        if records.is_empty() {
            return self.mark_copied(key).await;
        }
        let expected: HashSet<String> = records
            .iter()
            .filter_map(|r| primary_key(r, schema.key_path))
            .collect();
        let count = records.len();

        let collection = self.docs.collection(schema.name);
        if let Err(e) = collection.bulk_put(records).await {
            record_failure(report, key, e);
            return Ok(());
        }

        let stored = collection.count().await?;
        if stored < expected.len() {
            record_failure(
                report,
                key,
                StorageError::InvalidData(format!(
                    "expected at least {} records in {}, found {}",
                    expected.len(),
                    schema.name,
                    stored
                )),
            );
            return Ok(());
        }

        self.mark_copied(key).await?;
        debug!(key, collection = schema.name, count, "Migrated key");
        report.migrated.push((key.to_string(), count));
        Ok(())
    }

    /// Remove legacy flat keys whose data is confirmed in the document store.
    ///
    /// Does nothing until the migration has completed. A key is only removed
    /// when its target collection is non-empty.
    pub async fn cleanup_legacy_keys(&self) -> StorageResult<Vec<String>> {
        if !self.is_marked().await? {
            debug!("Skipping legacy cleanup, migration not complete");
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for (key, schema) in RECORD_KEYS {
            if self.kv.get(key).await.is_none() {
                continue;
            }
            if self.docs.collection(schema.name).count().await? > 0 {
                self.kv.remove(key).await?;
                removed.push(key.to_string());
            }
        }

        let methods = self.docs.collection(CUSTOM_METHODS.name);
        if self.kv.get(KEY_CUSTOM_METHODS).await.is_some() && methods.count().await? > 0 {
            self.kv.remove(KEY_CUSTOM_METHODS).await?;
            removed.push(KEY_CUSTOM_METHODS.to_string());
        }
        for key in self.kv.keys().await {
            let Some(equipment_id) = key.strip_prefix(KEY_CUSTOM_METHODS_PREFIX) else {
                continue;
            };
            if methods.get(equipment_id).await?.is_some() {
                self.kv.remove(&key).await?;
                removed.push(key);
            }
        }

        if !removed.is_empty() {
            info!(keys = removed.len(), "Removed migrated legacy keys");
        }
        Ok(removed)
    }
}

fn record_failure(report: &mut MigrationReport, key: &str, error: StorageError) {
    warn!(key, error = %error, "Failed to migrate legacy key");
    report.failed.push((key.to_string(), error.to_string()));
}

fn primary_key(record: &Value, key_path: &str) -> Option<String> {
    match record.get(key_path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a JSON array, dropping records with no primary key.
fn parse_records(raw: &str, key_path: &str) -> StorageResult<(Vec<Value>, usize)> {
    let records: Vec<Value> = serde_json::from_str(raw)?;
    let total = records.len();
    let kept: Vec<Value> = records
        .into_iter()
        .filter(|r| primary_key(r, key_path).is_some())
        .collect();
    let skipped = total - kept.len();
    if skipped > 0 {
        warn!(key_path, skipped, "Dropping legacy records without a primary key");
    }
    Ok((kept, skipped))
}

/// Flatten the legacy `{ equipmentId: Method[] }` map into method records.
fn parse_method_map(raw: &str) -> StorageResult<Vec<Value>> {
    let map: Map<String, Value> = serde_json::from_str(raw)?;
    let mut records = Vec::with_capacity(map.len());
    for (equipment_id, methods) in map {
        if equipment_id.is_empty() {
            continue;
        }
        let methods = match methods {
            Value::Array(items) => items,
            other => {
                return Err(StorageError::InvalidData(format!(
                    "methods for {} are not an array: {}",
                    equipment_id, other
                )))
            }
        };
        records.push(json!({ "equipmentId": equipment_id, "methods": methods }));
    }
    Ok(records)
}
