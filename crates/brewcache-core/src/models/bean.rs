use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A coffee bean in the inventory.
///
/// Only the identity fields are typed; everything else the UI stores
/// (roast date, origin, remaining weight, ...) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoffeeBean {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CoffeeBean {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}
