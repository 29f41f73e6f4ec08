//! Brewing methods (recipes) and their per-equipment collections.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Valve position for brewers such as the Clever dripper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum ValveStatus {
    Open,
    Closed,
}

/// One timed step of a brew.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// End of the stage, seconds from the start of the brew.
    pub time: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pour_time: Option<u32>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub water: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pour_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valve_status: Option<ValveStatus>,
    /// Fields not modelled here, kept verbatim.
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

/// Recipe parameters. Older data stores some of these as numbers, so every
/// typed field accepts any scalar and unknown fields are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct MethodParams {
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub coffee: String,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub water: String,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub ratio: String,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub grind_size: String,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub temp: String,
    #[serde(
        skip_serializing_if = "String::is_empty",
        deserialize_with = "deserialize_lenient_string"
    )]
    pub video_url: String,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

/// A brewing recipe belonging to one equipment.
///
/// A freshly constructed method has no id; one is assigned the first time
/// it is saved and kept on every later update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Method {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub params: MethodParams,
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl Method {
    pub fn new(name: impl Into<String>, params: MethodParams, stages: Vec<Stage>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            params,
            stages,
            extra: Map::new(),
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Total brew time in seconds.
    pub fn total_time(&self) -> u32 {
        self.stages.iter().map(|s| s.time).max().unwrap_or(0)
    }
}

/// Record of the `customMethods` collection, keyed by `equipment_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentMethods {
    pub equipment_id: String,
    #[serde(default, deserialize_with = "deserialize_methods")]
    pub methods: Vec<Method>,
}

// Scalars of any type as a string; null reads as empty.
fn deserialize_lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

// One unreadable method must not hide the rest of the collection.
fn deserialize_methods<'de, D>(deserializer: D) -> Result<Vec<Method>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    let total = raw.len();
    let methods: Vec<Method> = raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Method>(value) {
            Ok(method) => Some(method),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable method record");
                None
            }
        })
        .collect();
    if methods.len() < total {
        warn!(skipped = total - methods.len(), "Dropped unreadable methods");
    }
    Ok(methods)
}
