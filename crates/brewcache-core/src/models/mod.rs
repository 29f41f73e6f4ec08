//! Data models for persisted brew guide entities.
//!
//! This module contains the data structures stored by the persistence layer:
//!
//! - `Equipment`, `PourAnimation`: user-defined brewers
//! - `Method`, `Stage`, `MethodParams`: recipes, grouped per equipment
//! - `CoffeeBean`, `BrewingNote`: inventory and tasting notes
//! - `Setting`: one row of the settings collection
//!
//! All models serialize to the camelCase JSON used by the UI and by
//! import/export files.

pub mod bean;
pub mod equipment;
pub mod method;
pub mod note;

use serde::{Deserialize, Serialize};

pub use bean::CoffeeBean;
pub use equipment::{AnimationType, Equipment, PourAnimation};
pub use method::{EquipmentMethods, Method, MethodParams, Stage, ValveStatus};
pub use note::BrewingNote;

/// A row of the `settings` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

impl Setting {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
