use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tasting note written after a brew.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrewingNote {
    #[serde(default)]
    pub id: String,
    /// Creation time, epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BrewingNote {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            timestamp: 0,
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

impl Default for BrewingNote {
    fn default() -> Self {
        Self::new()
    }
}
