//! Equipment import and export.
//!
//! An export bundles one equipment with its methods. Every id is carried
//! verbatim so the association survives a round trip.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::EntityManager;
use crate::error::{EntityError, EntityResult, StorageError};
use crate::models::{Equipment, Method};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentExport {
    pub equipment: Equipment,
    #[serde(default)]
    pub methods: Vec<Method>,
}

impl EquipmentExport {
    pub fn to_json(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> EntityResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| EntityError::Validation(format!("Invalid equipment export: {}", e)))
    }
}

impl EntityManager {
    pub async fn export_equipment(&self, id: &str) -> EntityResult<EquipmentExport> {
        let equipment = self
            .read_equipments()
            .await?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| EntityError::not_found("Equipment", id))?;
        let methods = self.read_methods(id).await?;
        Ok(EquipmentExport { equipment, methods })
    }

    /// Import an export, keeping the supplied equipment and method ids.
    /// Importing the same file twice adds no duplicate methods.
    pub async fn import_equipment(&self, export: EquipmentExport) -> EntityResult<Equipment> {
        if !export.equipment.has_id() && !export.methods.is_empty() {
            info!(name = %export.equipment.name, "Importing equipment without id, a new one will be assigned");
        }
        let methods = export.methods.len();
        let saved = self
            .save_custom_equipment_with_methods(export.equipment, export.methods)
            .await?;
        info!(equipment_id = %saved.id, methods, "Imported equipment");
        Ok(saved)
    }
}
