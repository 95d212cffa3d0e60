//! Entity keys.

use entitrack_codec::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an entity within a manager: its type plus key values in
/// key-property declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    type_name: String,
    values: Vec<Value>,
}

impl EntityKey {
    /// Creates a key.
    pub fn new(type_name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            type_name: type_name.into(),
            values,
        }
    }

    /// Returns the entity type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the key values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns true for single-property keys.
    pub fn is_single(&self) -> bool {
        self.values.len() == 1
    }

    /// Returns true if any part is null. Such keys identify nothing.
    pub fn has_null(&self) -> bool {
        self.values.iter().any(Value::is_null)
    }

    /// Converts to a codec map `{type, values}`.
    pub fn to_value(&self) -> Value {
        Value::text_map([
            ("type", Value::Text(self.type_name.clone())),
            ("values", Value::Array(self.values.clone())),
        ])
    }

    /// Reads a key written by [`EntityKey::to_value`].
    pub fn from_value(value: &Value) -> Option<Self> {
        let type_name = value.get("type")?.as_text()?.to_string();
        let values = value.get("values")?.as_array()?.to_vec();
        Some(Self { type_name, values })
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:(", self.type_name)?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}
