use tracing::{debug, info, warn};

use super::{require_name, EntityManager, ALL_KEY};
use crate::error::{EntityError, EntityResult, StorageContext};
use crate::models::{Equipment, Method};
use crate::store::{methods_key, CUSTOM_EQUIPMENTS, CUSTOM_METHODS, KEY_CUSTOM_EQUIPMENTS};
use crate::utils::equipment_id;

impl EntityManager {
    /// All custom equipment. Never fails; errors read as an empty list.
    pub async fn load_custom_equipments(&self) -> Vec<Equipment> {
        if let Some(list) = self.equipment_cache.lock().await.get(ALL_KEY) {
            return list;
        }
        match self.read_equipments().await {
            Ok(list) => {
                self.equipment_cache
                    .lock()
                    .await
                    .set(ALL_KEY, list.clone(), None);
                list
            }
            Err(e) => {
                warn!(error = %e, "Failed to load custom equipment");
                Vec::new()
            }
        }
    }

    pub async fn get_custom_equipment(&self, id: &str) -> Option<Equipment> {
        self.load_custom_equipments()
            .await
            .into_iter()
            .find(|e| e.id == id)
    }

    /// True if no equipment other than `current_id` is called `name`.
    pub async fn is_name_available(&self, name: &str, current_id: Option<&str>) -> bool {
        !self
            .load_custom_equipments()
            .await
            .iter()
            .any(|e| e.name == name && Some(e.id.as_str()) != current_id)
    }

    /// Insert or replace equipment.
    ///
    /// A known id replaces the stored record in place. An unknown id is
    /// inserted as given, so imported data keeps its method associations.
    /// An empty id gets a freshly generated one. Name uniqueness is not
    /// checked here, see [`EntityManager::is_name_available`].
    pub async fn save_custom_equipment(&self, equipment: Equipment) -> EntityResult<Equipment> {
        require_name("Equipment", &equipment.name)?;
        let mut list = self.read_equipments().await?;

        let mut equipment = equipment;
        equipment.is_custom = true;
        if !equipment.has_id() {
            equipment.id = equipment_id(equipment.animation_type.as_str());
        }

        let position = list.iter().position(|e| e.id == equipment.id);
        self.store_equipment(&mut list, position, equipment).await
    }

    /// Save equipment together with its methods.
    ///
    /// Only methods not already stored for this equipment (matched by id,
    /// then by name) are added, so repeating an import adds nothing.
    pub async fn save_custom_equipment_with_methods(
        &self,
        equipment: Equipment,
        methods: Vec<Method>,
    ) -> EntityResult<Equipment> {
        let saved = self.save_custom_equipment(equipment).await?;
        let added = self.add_missing_methods(&saved.id, methods).await?;
        debug!(equipment_id = %saved.id, added, "Saved equipment methods");
        Ok(saved)
    }

    /// Replace existing equipment. Fails with `NotFound` for an unknown id.
    pub async fn update_custom_equipment(
        &self,
        id: &str,
        equipment: Equipment,
    ) -> EntityResult<Equipment> {
        require_name("Equipment", &equipment.name)?;
        let mut list = self.read_equipments().await?;
        let position = list
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| EntityError::not_found("Equipment", id))?;

        let mut equipment = equipment;
        equipment.id = id.to_string();
        equipment.is_custom = true;
        self.store_equipment(&mut list, Some(position), equipment)
            .await
    }

    /// Delete equipment and, best effort, its method collection.
    pub async fn delete_custom_equipment(&self, id: &str) -> EntityResult<()> {
        let list = self.read_equipments().await?;
        if !list.iter().any(|e| e.id == id) {
            return Err(EntityError::not_found("Equipment", id));
        }

        self.docs
            .table::<Equipment>(CUSTOM_EQUIPMENTS.name)
            .delete(id)
            .await
            .with_context(|| format!("Failed to delete equipment {}", id))?;
        self.equipment_cache.lock().await.delete(ALL_KEY);
        let remaining = self
            .publish_collection::<Equipment>(CUSTOM_EQUIPMENTS.name, KEY_CUSTOM_EQUIPMENTS)
            .await?;
        self.equipment_cache
            .lock()
            .await
            .set(ALL_KEY, remaining, None);

        // Cascade: the equipment is gone even if its methods linger.
        self.method_cache.lock().await.delete(id);
        if let Err(e) = self.docs.collection(CUSTOM_METHODS.name).delete(id).await {
            warn!(equipment_id = id, error = %e, "Failed to delete equipment methods");
        }
        self.backup.remove(&methods_key(id)).await;
        self.events.data_changed(&methods_key(id));

        info!(equipment_id = id, "Deleted custom equipment");
        Ok(())
    }

    /// Write one equipment record and refresh everything that depends on it.
    async fn store_equipment(
        &self,
        list: &mut Vec<Equipment>,
        position: Option<usize>,
        equipment: Equipment,
    ) -> EntityResult<Equipment> {
        let previous_name = match position {
            Some(pos) => Some(std::mem::replace(&mut list[pos], equipment.clone()).name),
            None => {
                list.push(equipment.clone());
                None
            }
        };

        self.docs
            .table::<Equipment>(CUSTOM_EQUIPMENTS.name)
            .put(&equipment)
            .await
            .with_context(|| format!("Failed to save equipment {}", equipment.name))?;

        self.equipment_cache
            .lock()
            .await
            .set(ALL_KEY, list.clone(), None);
        self.backup.mirror(KEY_CUSTOM_EQUIPMENTS, list.as_slice()).await;
        self.events.data_changed(KEY_CUSTOM_EQUIPMENTS);

        if let Some(old) = previous_name {
            if old != equipment.name {
                self.on_equipment_renamed(&equipment.id, &old, &equipment.name)
                    .await;
            }
        }

        debug!(equipment_id = %equipment.id, name = %equipment.name, "Saved custom equipment");
        Ok(equipment)
    }

    /// Methods are keyed by equipment id, so a rename leaves their records
    /// alone. The cached list is dropped and the backup copy refreshed.
    async fn on_equipment_renamed(&self, id: &str, old: &str, new: &str) {
        debug!(equipment_id = id, old, new, "Equipment renamed");
        self.method_cache.lock().await.delete(id);
        match self.read_methods(id).await {
            Ok(methods) => {
                self.backup.mirror(&methods_key(id), &methods).await;
            }
            Err(e) => warn!(equipment_id = id, error = %e, "Failed to refresh methods after rename"),
        }
    }

    /// Read from the system of record, for write paths that must not guess.
    pub(super) async fn read_equipments(&self) -> EntityResult<Vec<Equipment>> {
        self.ensure_migrated().await;
        self.docs
            .table::<Equipment>(CUSTOM_EQUIPMENTS.name)
            .to_array()
            .await
            .context("Failed to load custom equipment")
    }
}
