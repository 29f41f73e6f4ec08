use std::collections::HashMap;

use futures::future::join_all;
use tracing::{debug, warn};

use super::{require_name, EntityManager};
use crate::error::{EntityError, EntityResult, StorageContext};
use crate::models::{EquipmentMethods, Method};
use crate::store::{methods_key, CUSTOM_METHODS};
use crate::utils::method_id;

/// Collapse records that describe the same method.
///
/// Records are keyed by id, or by name when they have none. On a collision
/// the later record replaces the earlier one only if it carries an id, and
/// a name-only record whose name matches an id-bearing one is dropped in
/// its favour. Survivors keep the position of the first record of their
/// group.
pub fn dedupe_methods(methods: Vec<Method>) -> Vec<Method> {
    let mut result: Vec<Method> = Vec::with_capacity(methods.len());
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for method in methods {
        if method.has_id() {
            let slot = by_id.get(&method.id).copied().or_else(|| {
                by_name
                    .get(&method.name)
                    .copied()
                    .filter(|&i| !result[i].has_id())
            });
            match slot {
                Some(i) => {
                    if by_name.get(&result[i].name) == Some(&i) {
                        by_name.remove(&result[i].name);
                    }
                    by_name.entry(method.name.clone()).or_insert(i);
                    by_id.insert(method.id.clone(), i);
                    result[i] = method;
                }
                None => {
                    let i = result.len();
                    by_id.insert(method.id.clone(), i);
                    by_name.entry(method.name.clone()).or_insert(i);
                    result.push(method);
                }
            }
        } else if !by_name.contains_key(&method.name) {
            by_name.insert(method.name.clone(), result.len());
            result.push(method);
        }
    }

    result
}

impl EntityManager {
    /// Methods of one equipment. Never fails; errors read as an empty list.
    pub async fn load_custom_methods_for_equipment(&self, equipment_id: &str) -> Vec<Method> {
        if let Some(methods) = self.method_cache.lock().await.get(equipment_id) {
            return methods;
        }
        match self.read_methods(equipment_id).await {
            Ok(methods) => {
                self.method_cache
                    .lock()
                    .await
                    .set(equipment_id, methods.clone(), None);
                methods
            }
            Err(e) => {
                warn!(equipment_id, error = %e, "Failed to load custom methods");
                Vec::new()
            }
        }
    }

    /// Insert or update a method. Its id is generated here if missing and
    /// kept on later updates; an updated method moves to the end.
    pub async fn save_custom_method(&self, equipment_id: &str, method: Method) -> EntityResult<Method> {
        require_equipment_id(equipment_id)?;
        require_name("Method", &method.name)?;

        let mut method = method;
        if !method.has_id() {
            method.id = method_id();
        }

        let mut methods = self.read_methods(equipment_id).await?;
        methods.retain(|m| m.id != method.id);
        methods.push(method.clone());
        self.write_methods(equipment_id, dedupe_methods(methods))
            .await?;

        debug!(equipment_id, method_id = %method.id, "Saved custom method");
        Ok(method)
    }

    /// Remove a method. Returns `false` when nothing matched.
    pub async fn delete_custom_method(&self, equipment_id: &str, method_id: &str) -> EntityResult<bool> {
        let methods = self.read_methods(equipment_id).await?;
        let before = methods.len();
        let remaining: Vec<Method> = methods.into_iter().filter(|m| m.id != method_id).collect();
        if remaining.len() == before {
            return Ok(false);
        }
        self.write_methods(equipment_id, remaining).await?;
        debug!(equipment_id, method_id, "Deleted custom method");
        Ok(true)
    }

    /// Add the methods not already stored for `equipment_id`, matched by id
    /// and then by name. Supplied ids are kept. Returns how many were added.
    pub async fn add_missing_methods(
        &self,
        equipment_id: &str,
        incoming: Vec<Method>,
    ) -> EntityResult<usize> {
        require_equipment_id(equipment_id)?;
        if incoming.is_empty() {
            return Ok(0);
        }

        let mut methods = self.read_methods(equipment_id).await?;
        let mut added = 0;
        for method in incoming {
            let present = methods
                .iter()
                .any(|m| (method.has_id() && m.id == method.id) || m.name == method.name);
            if present {
                continue;
            }
            methods.push(method);
            added += 1;
        }

        if added > 0 {
            self.write_methods(equipment_id, dedupe_methods(methods))
                .await?;
        }
        Ok(added)
    }

    /// Persist a whole method collection, assigning ids to records without one.
    async fn write_methods(&self, equipment_id: &str, methods: Vec<Method>) -> EntityResult<()> {
        let methods: Vec<Method> = methods
            .into_iter()
            .map(|mut m| {
                if !m.has_id() {
                    m.id = method_id();
                }
                m
            })
            .collect();

        let record = EquipmentMethods {
            equipment_id: equipment_id.to_string(),
            methods,
        };
        self.docs
            .table::<EquipmentMethods>(CUSTOM_METHODS.name)
            .put(&record)
            .await
            .with_context(|| format!("Failed to save methods for equipment {}", equipment_id))?;

        let key = methods_key(equipment_id);
        self.method_cache
            .lock()
            .await
            .set(equipment_id, record.methods.clone(), None);
        self.backup.mirror(&key, &record.methods).await;
        self.events.data_changed(&key);
        Ok(())
    }

    pub(super) async fn read_methods(&self, equipment_id: &str) -> EntityResult<Vec<Method>> {
        self.ensure_migrated().await;
        let record = self
            .docs
            .table::<EquipmentMethods>(CUSTOM_METHODS.name)
            .get(equipment_id)
            .await
            .with_context(|| format!("Failed to load methods for equipment {}", equipment_id))?;
        Ok(record.map(|r| r.methods).unwrap_or_default())
    }

    /// Preload method lists for the given equipment ids. The cache lock is
    /// not held while the document store is read.
    pub async fn warmup_methods(&self, equipment_ids: Vec<String>) {
        self.ensure_migrated().await;
        let missing = self.method_cache.lock().await.missing(equipment_ids);
        if missing.is_empty() {
            return;
        }

        let table = self.docs.table::<EquipmentMethods>(CUSTOM_METHODS.name);
        let results = join_all(missing.iter().map(|id| table.get(id))).await;
        let loaded = missing
            .into_iter()
            .zip(results)
            .map(|(id, result)| (id, result.map(|r| r.map(|r| r.methods).unwrap_or_default())))
            .collect();
        self.method_cache.lock().await.fill(loaded);
    }
}

fn require_equipment_id(equipment_id: &str) -> EntityResult<()> {
    if equipment_id.is_empty() {
        return Err(EntityError::Validation("equipment id is required".to_string()));
    }
    Ok(())
}
