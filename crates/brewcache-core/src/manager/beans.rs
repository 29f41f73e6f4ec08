use chrono::Utc;
use tracing::{debug, warn};

use super::{require_name, EntityManager, ALL_KEY};
use crate::error::{EntityError, EntityResult, StorageContext};
use crate::models::{BrewingNote, CoffeeBean};
use crate::store::{BREWING_NOTES, COFFEE_BEANS, KEY_BREWING_NOTES, KEY_COFFEE_BEANS};
use crate::utils::record_id;

impl EntityManager {
    // ===== Coffee beans =====

    /// Every bean in the inventory. Never fails; errors read as an empty list.
    pub async fn get_all_beans(&self) -> Vec<CoffeeBean> {
        if let Some(beans) = self.bean_cache.lock().await.get(ALL_KEY) {
            return beans;
        }
        self.ensure_migrated().await;
        match self.docs.table::<CoffeeBean>(COFFEE_BEANS.name).to_array().await {
            Ok(beans) => {
                self.bean_cache.lock().await.set(ALL_KEY, beans.clone(), None);
                beans
            }
            Err(e) => {
                warn!(error = %e, "Failed to load coffee beans");
                Vec::new()
            }
        }
    }

    pub async fn get_bean(&self, id: &str) -> Option<CoffeeBean> {
        self.get_all_beans().await.into_iter().find(|b| b.id == id)
    }

    pub async fn add_bean(&self, bean: CoffeeBean) -> EntityResult<CoffeeBean> {
        require_name("Bean", &bean.name)?;
        self.ensure_migrated().await;
        let table = self.docs.table::<CoffeeBean>(COFFEE_BEANS.name);

        let mut bean = bean;
        if bean.id.is_empty() {
            bean.id = record_id();
        } else if table
            .get(&bean.id)
            .await
            .context("Failed to add bean")?
            .is_some()
        {
            return Err(EntityError::Validation(format!("bean {} already exists", bean.id)));
        }

        table.put(&bean).await.context("Failed to add bean")?;
        self.refresh_beans().await?;
        debug!(bean_id = %bean.id, "Added coffee bean");
        Ok(bean)
    }

    pub async fn update_bean(&self, id: &str, bean: CoffeeBean) -> EntityResult<CoffeeBean> {
        require_name("Bean", &bean.name)?;
        self.ensure_migrated().await;
        let table = self.docs.table::<CoffeeBean>(COFFEE_BEANS.name);
        if table
            .get(id)
            .await
            .context("Failed to update bean")?
            .is_none()
        {
            return Err(EntityError::not_found("Bean", id));
        }

        let mut bean = bean;
        bean.id = id.to_string();
        table.put(&bean).await.context("Failed to update bean")?;
        self.refresh_beans().await?;
        Ok(bean)
    }

    pub async fn delete_bean(&self, id: &str) -> EntityResult<()> {
        self.ensure_migrated().await;
        let removed = self
            .docs
            .table::<CoffeeBean>(COFFEE_BEANS.name)
            .delete(id)
            .await
            .context("Failed to delete bean")?;
        if !removed {
            return Err(EntityError::not_found("Bean", id));
        }
        self.refresh_beans().await
    }

    async fn refresh_beans(&self) -> EntityResult<()> {
        self.bean_cache.lock().await.delete(ALL_KEY);
        let beans = self
            .publish_collection::<CoffeeBean>(COFFEE_BEANS.name, KEY_COFFEE_BEANS)
            .await?;
        self.bean_cache.lock().await.set(ALL_KEY, beans, None);
        Ok(())
    }

    // ===== Brewing notes =====

    /// Every brewing note. Never fails; errors read as an empty list.
    pub async fn get_all_notes(&self) -> Vec<BrewingNote> {
        if let Some(notes) = self.note_cache.lock().await.get(ALL_KEY) {
            return notes;
        }
        self.ensure_migrated().await;
        match self.docs.table::<BrewingNote>(BREWING_NOTES.name).to_array().await {
            Ok(notes) => {
                self.note_cache.lock().await.set(ALL_KEY, notes.clone(), None);
                notes
            }
            Err(e) => {
                warn!(error = %e, "Failed to load brewing notes");
                Vec::new()
            }
        }
    }

    /// Insert or replace a note, filling in id and timestamp when missing.
    pub async fn save_note(&self, note: BrewingNote) -> EntityResult<BrewingNote> {
        self.ensure_migrated().await;
        let mut note = note;
        if note.id.is_empty() {
            note.id = record_id();
        }
        if note.timestamp == 0 {
            note.timestamp = Utc::now().timestamp_millis();
        }

        self.docs
            .table::<BrewingNote>(BREWING_NOTES.name)
            .put(&note)
            .await
            .context("Failed to save brewing note")?;
        self.refresh_notes().await?;
        Ok(note)
    }

    pub async fn delete_note(&self, id: &str) -> EntityResult<()> {
        self.ensure_migrated().await;
        let removed = self
            .docs
            .table::<BrewingNote>(BREWING_NOTES.name)
            .delete(id)
            .await
            .context("Failed to delete brewing note")?;
        if !removed {
            return Err(EntityError::not_found("Note", id));
        }
        self.refresh_notes().await
    }

    async fn refresh_notes(&self) -> EntityResult<()> {
        self.note_cache.lock().await.delete(ALL_KEY);
        let notes = self
            .publish_collection::<BrewingNote>(BREWING_NOTES.name, KEY_BREWING_NOTES)
            .await?;
        self.note_cache.lock().await.set(ALL_KEY, notes, None);
        Ok(())
    }
}
