//! End-to-end behaviour of the persistence layer across both backends.

use std::sync::Arc;

use brewcache_core::models::{EquipmentMethods, Setting};
use brewcache_core::store::{methods_key, KEY_CUSTOM_EQUIPMENTS, SCHEMA};
use brewcache_core::{
    AnimationType, CacheOptions, CacheSettings, Config, DocumentStore, EntityManager, Equipment,
    EquipmentExport, EventBus, KeyValueStore, Method, MethodParams, MigrationCoordinator,
    MigrationState,
};
use serde_json::Value;

fn stores() -> (Arc<KeyValueStore>, Arc<DocumentStore>, EventBus) {
    let events = EventBus::new();
    (
        Arc::new(KeyValueStore::in_memory(events.clone())),
        Arc::new(DocumentStore::in_memory(SCHEMA)),
        events,
    )
}

fn method(id: &str, name: &str) -> Method {
    let mut m = Method::new(name, MethodParams::default(), Vec::new());
    m.id = id.to_string();
    m
}

async fn snapshot(docs: &DocumentStore) -> Vec<Vec<Value>> {
    let mut out = Vec::new();
    for name in ["coffeeBeans", "brewingNotes", "customEquipments", "customMethods"] {
        out.push(docs.collection(name).to_array().await.unwrap());
    }
    out
}

async fn seed_legacy(kv: &KeyValueStore) {
    kv.set("coffeeBeans", r#"[{"id":"b1","name":"Kenya AA"},{"id":"b2","name":"Colombia"}]"#)
        .await
        .unwrap();
    kv.set("brewingNotes", r#"[{"id":"n1","timestamp":1700000000000,"rating":5}]"#)
        .await
        .unwrap();
    kv.set(
        "customEquipments",
        r#"[{"id":"custom-v60-1700000000000-abc1234","name":"My V60","isCustom":true,"animationType":"v60","hasValve":false}]"#,
    )
    .await
    .unwrap();
    kv.set(
        "customMethods_custom-v60-1700000000000-abc1234",
        r#"[{"id":"method-1","name":"Morning"},{"name":"Legacy"}]"#,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn migration_is_idempotent() {
    let (kv, docs, _) = stores();
    seed_legacy(&kv).await;

    let first = MigrationCoordinator::new(Arc::clone(&kv), Arc::clone(&docs));
    let report = first.ensure_migrated().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(first.state(), MigrationState::Migrated);
    let after_first = snapshot(&docs).await;
    let marked_at = docs
        .table::<Setting>("settings")
        .get("migratedAt")
        .await
        .unwrap()
        .unwrap();

    // A second coordinator sees the marker and leaves everything alone.
    let second = MigrationCoordinator::new(Arc::clone(&kv), Arc::clone(&docs));
    assert!(second.ensure_migrated().await.unwrap().already_migrated);
    let marked_again = docs
        .table::<Setting>("settings")
        .get("migratedAt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(marked_at, marked_again);

    // Simulate a crash before the marker was written: the copy runs again
    // and produces exactly the same content.
    docs.collection("settings").clear().await.unwrap();
    let rerun = MigrationCoordinator::new(Arc::clone(&kv), Arc::clone(&docs));
    assert!(!rerun.ensure_migrated().await.unwrap().already_migrated);
    assert_eq!(snapshot(&docs).await, after_first);
}

#[tokio::test]
async fn reads_trigger_migration_lazily() {
    let (kv, docs, events) = stores();
    seed_legacy(&kv).await;
    let manager = EntityManager::new(kv, docs, events, CacheOptions::default());
    assert_eq!(manager.migration_state(), MigrationState::NotMigrated);

    let equipment = manager.load_custom_equipments().await;
    assert_eq!(equipment.len(), 1);
    assert_eq!(manager.migration_state(), MigrationState::Migrated);
    assert_eq!(manager.get_all_beans().await.len(), 2);
    assert_eq!(manager.get_all_notes().await.len(), 1);

    let methods = manager
        .load_custom_methods_for_equipment("custom-v60-1700000000000-abc1234")
        .await;
    assert_eq!(methods.len(), 2);
}

#[tokio::test]
async fn dedup_invariant_holds_over_saves() {
    let manager = EntityManager::in_memory();
    let eq = "custom-v60-1-x";
    manager.save_custom_method(eq, method("m1", "A")).await.unwrap();
    manager.save_custom_method(eq, method("m2", "B")).await.unwrap();
    manager.save_custom_method(eq, method("m1", "A again")).await.unwrap();
    manager.save_custom_method(eq, method("", "C")).await.unwrap();
    manager.save_custom_method(eq, method("m2", "B")).await.unwrap();

    let methods = manager.load_custom_methods_for_equipment(eq).await;
    let mut ids: Vec<&str> = methods.iter().map(|m| m.id.as_str()).collect();
    assert!(ids.iter().all(|id| !id.is_empty()));
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total);
    assert_eq!(total, 3);
}

#[tokio::test]
async fn rename_keeps_methods_attached() {
    let (kv, docs, events) = stores();
    let manager = EntityManager::new(Arc::clone(&kv), docs, events, CacheOptions::default());

    let eq = manager
        .save_custom_equipment(Equipment::new("Origami", AnimationType::Origami))
        .await
        .unwrap();
    manager.save_custom_method(&eq.id, method("m1", "Sweet")).await.unwrap();
    manager.save_custom_method(&eq.id, method("m2", "Bright")).await.unwrap();

    let mut renamed = eq.clone();
    renamed.name = "Origami Dripper S".to_string();
    let saved = manager.save_custom_equipment(renamed).await.unwrap();
    assert_eq!(saved.id, eq.id);

    let methods = manager.load_custom_methods_for_equipment(&eq.id).await;
    assert_eq!(methods.len(), 2);

    // Backup replica still holds the methods under the same key.
    let backup: Vec<Method> = kv.get_json(&methods_key(&eq.id)).await.unwrap();
    assert_eq!(backup.len(), 2);
    let equipments: Vec<Equipment> = kv.get_json(KEY_CUSTOM_EQUIPMENTS).await.unwrap();
    assert_eq!(equipments[0].name, "Origami Dripper S");
}

#[tokio::test]
async fn export_import_round_trip() {
    let source = EntityManager::in_memory();
    let eq = source
        .save_custom_equipment(Equipment::new("Clever", AnimationType::Clever).with_valve(true))
        .await
        .unwrap();
    let m1 = source.save_custom_method(&eq.id, method("", "Steep")).await.unwrap();
    let m2 = source.save_custom_method(&eq.id, method("", "Iced")).await.unwrap();

    let json = source.export_equipment(&eq.id).await.unwrap().to_json().unwrap();

    let target = EntityManager::in_memory();
    let imported = target
        .import_equipment(EquipmentExport::from_json(&json).unwrap())
        .await
        .unwrap();
    assert_eq!(imported.id, eq.id);

    let methods = target.load_custom_methods_for_equipment(&eq.id).await;
    let ids: Vec<&str> = methods.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![m1.id.as_str(), m2.id.as_str()]);

    // Importing again adds nothing.
    target
        .import_equipment(EquipmentExport::from_json(&json).unwrap())
        .await
        .unwrap();
    assert_eq!(target.load_custom_methods_for_equipment(&eq.id).await.len(), 2);
    assert_eq!(target.load_custom_equipments().await.len(), 1);
}

#[tokio::test]
async fn file_backends_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: Some(dir.path().to_path_buf()),
        cache: CacheSettings::default(),
    };

    let eq_id = {
        let manager = EntityManager::open(&config, EventBus::new()).unwrap();
        let eq = manager
            .save_custom_equipment(Equipment::new("Espresso", AnimationType::Espresso))
            .await
            .unwrap();
        manager.save_custom_method(&eq.id, method("m1", "Ristretto")).await.unwrap();
        manager.shutdown().await;
        eq.id
    };

    let manager = EntityManager::open(&config, EventBus::new()).unwrap();
    assert_eq!(manager.load_custom_equipments().await[0].id, eq_id);
    assert_eq!(manager.load_custom_methods_for_equipment(&eq_id).await.len(), 1);

    let docs = DocumentStore::open(config.documents_dir().unwrap(), SCHEMA).unwrap();
    let record = docs
        .table::<EquipmentMethods>("customMethods")
        .get(&eq_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.methods[0].name, "Ristretto");
}

#[tokio::test]
async fn cache_serves_repeat_reads() {
    let manager = EntityManager::in_memory();
    manager
        .save_custom_equipment(Equipment::new("V60", AnimationType::V60))
        .await
        .unwrap();

    manager.load_custom_equipments().await;
    manager.load_custom_equipments().await;
    let stats = manager.cache_stats().await;
    assert_eq!(stats.equipment.size, 1);
    assert_eq!(stats.equipment.total_access_count, 2);

    manager.shutdown().await;
    assert_eq!(manager.cache_stats().await.equipment.size, 0);
}

#[tokio::test]
async fn generated_equipment_id_shape() {
    let manager = EntityManager::in_memory();
    let first = manager
        .save_custom_equipment(Equipment::new("V60", AnimationType::V60))
        .await
        .unwrap();

    let rest = first.id.strip_prefix("custom-v60-").unwrap();
    let (millis, token) = rest.split_once('-').unwrap();
    assert!(!millis.is_empty() && millis.chars().all(|c| c.is_ascii_digit()));
    assert!(!token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric()));

    // Name uniqueness is advisory; save itself accepts the duplicate.
    let second = manager
        .save_custom_equipment(Equipment::new("V60", AnimationType::V60))
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(manager.load_custom_equipments().await.len(), 2);
}

#[tokio::test]
async fn deleted_equipment_stays_deleted_while_migration_retries() {
    let (kv, docs, events) = stores();
    kv.set("customEquipments", r#"[{"id":"eq1","name":"V60","animationType":"v60"}]"#)
        .await
        .unwrap();
    kv.set("customMethods", r#"{"eq1":[{"id":"m1","name":"Classic"}]}"#)
        .await
        .unwrap();
    kv.set("customMethods_eqX", "[corrupt").await.unwrap();

    let manager = EntityManager::new(kv, Arc::clone(&docs), events, CacheOptions::default());
    assert_eq!(manager.load_custom_methods_for_equipment("eq1").await.len(), 1);
    assert_eq!(manager.migration_state(), MigrationState::NotMigrated);

    manager.delete_custom_equipment("eq1").await.unwrap();
    assert!(manager.load_custom_methods_for_equipment("eq1").await.is_empty());
    assert!(docs.collection("customMethods").get("eq1").await.unwrap().is_none());
    assert!(manager.load_custom_equipments().await.is_empty());
}

#[tokio::test]
async fn legacy_methods_with_numeric_params_stay_usable() {
    let (kv, docs, events) = stores();
    kv.set(
        "customMethods_eq1",
        r#"[{"id":"m1","name":"A","params":{"coffee":15,"water":250}},{"id":"m2","name":"B"}]"#,
    )
    .await
    .unwrap();
    let manager = EntityManager::new(kv, docs, events, CacheOptions::default());

    let methods = manager.load_custom_methods_for_equipment("eq1").await;
    assert_eq!(methods.len(), 2);
    assert_eq!(methods[0].params.coffee, "15");

    manager.save_custom_method("eq1", method("m3", "C")).await.unwrap();
    assert_eq!(manager.load_custom_methods_for_equipment("eq1").await.len(), 3);
}

#[tokio::test]
async fn unknown_equipment_fields_survive_saves() {
    let (kv, docs, events) = stores();
    kv.set(
        "customEquipments",
        r#"[{"id":"e1","name":"Flower","animationType":"custom","customShapeSvg":"<svg/>"}]"#,
    )
    .await
    .unwrap();
    let manager = EntityManager::new(Arc::clone(&kv), Arc::clone(&docs), events, CacheOptions::default());

    let mut eq = manager.get_custom_equipment("e1").await.unwrap();
    eq.name = "Renamed".to_string();
    manager.save_custom_equipment(eq).await.unwrap();

    let stored = docs.collection("customEquipments").get("e1").await.unwrap().unwrap();
    assert_eq!(stored["customShapeSvg"], "<svg/>");
    assert_eq!(stored["name"], "Renamed");
    let backup: Vec<Value> = kv.get_json(KEY_CUSTOM_EQUIPMENTS).await.unwrap();
    assert_eq!(backup[0]["customShapeSvg"], "<svg/>");

    let json = manager.export_equipment("e1").await.unwrap().to_json().unwrap();
    let target = EntityManager::in_memory();
    let imported = target
        .import_equipment(EquipmentExport::from_json(&json).unwrap())
        .await
        .unwrap();
    assert_eq!(imported.extra["customShapeSvg"], "<svg/>");
}
