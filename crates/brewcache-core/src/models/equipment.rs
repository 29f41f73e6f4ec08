//! Custom brewing equipment definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Brewer shape used to pick the pouring animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum AnimationType {
    V60,
    Kalita,
    Origami,
    Clever,
    Espresso,
    #[default]
    #[serde(other)]
    Custom,
}

impl AnimationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimationType::V60 => "v60",
            AnimationType::Kalita => "kalita",
            AnimationType::Origami => "origami",
            AnimationType::Clever => "clever",
            AnimationType::Espresso => "espresso",
            AnimationType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for AnimationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-drawn pouring animation attached to custom equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct PourAnimation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub custom_animation_svg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pour_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_system_default: Option<bool>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

/// User-defined brewing equipment.
///
/// `id` is empty until the equipment is first saved; after that it never
/// changes, even when the equipment is renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default = "default_is_custom")]
    pub is_custom: bool,
    #[serde(default)]
    pub animation_type: AnimationType,
    #[serde(default)]
    pub has_valve: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_pour_animations: Vec<PourAnimation>,
    /// Fields not modelled here (custom shapes, notes, ...), kept verbatim.
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

fn default_is_custom() -> bool {
    true
}

impl Equipment {
    pub fn new(name: impl Into<String>, animation_type: AnimationType) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            is_custom: true,
            animation_type,
            has_valve: false,
            custom_pour_animations: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_valve(mut self, has_valve: bool) -> Self {
        self.has_valve = has_valve;
        self
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equipment_json_shape() {
        let mut eq = Equipment::new("Hario V60", AnimationType::V60).with_valve(false);
        eq.id = "custom-v60-1700000000000-abc1234".to_string();
        let json = serde_json::to_value(&eq).unwrap();
        assert_eq!(json["id"], "custom-v60-1700000000000-abc1234");
        assert_eq!(json["isCustom"], true);
        assert_eq!(json["animationType"], "v60");
        assert_eq!(json["hasValve"], false);
        assert!(json.get("customPourAnimations").is_none());
    }

    #[test]
    fn test_unknown_animation_type_is_custom() {
        let eq: Equipment =
            serde_json::from_str(r#"{"name": "Siphon", "animationType": "siphon"}"#).unwrap();
        assert_eq!(eq.animation_type, AnimationType::Custom);
        assert!(eq.is_custom);
        assert!(!eq.has_id());
    }

    #[test]
    fn test_unknown_fields_are_kept() {
        let json = r#"{"id":"e1","name":"Flower","animationType":"custom","customShapeSvg":"<svg/>",
            "customPourAnimations":[{"id":"p1","name":"Spiral","previewFrames":3}]}"#;
        let eq: Equipment = serde_json::from_str(json).unwrap();
        let back = serde_json::to_value(&eq).unwrap();
        assert_eq!(back["customShapeSvg"], "<svg/>");
        assert_eq!(back["customPourAnimations"][0]["previewFrames"], 3);
    }
}
