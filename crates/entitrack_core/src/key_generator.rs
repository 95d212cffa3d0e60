//! Temporary key generation.
//!
//! New entities whose keys are assigned by the backing store carry a
//! temporary key until saved. Numeric temp keys count down from -1 so they
//! never collide with store-assigned (positive) keys.

use crate::entity::EntityKey;
use crate::error::{CoreError, CoreResult};
use crate::metadata::DataType;
use entitrack_codec::Value;
use std::collections::HashSet;
use uuid::Uuid;

/// Mints temporary key values and remembers which keys are temporary.
#[derive(Debug)]
pub struct KeyGenerator {
    next_number: i64,
    temp_keys: HashSet<EntityKey>,
}

impl KeyGenerator {
    /// Creates a generator whose first numeric key is -1.
    pub fn new() -> Self {
        Self {
            next_number: -1,
            temp_keys: HashSet::new(),
        }
    }

    /// Produces the next temporary value for a key of `data_type`.
    ///
    /// Integers and floats count down; GUIDs are random; strings are
    /// `K_<n>`.
    pub fn generate(&mut self, type_name: &str, data_type: DataType) -> CoreResult<Value> {
        let value = match data_type {
            DataType::Int16 | DataType::Int32 | DataType::Int64 => Value::Integer(self.take_number()),
            DataType::Decimal | DataType::Double | DataType::Single => {
                Value::Float(self.take_number() as f64)
            }
            DataType::String => Value::Text(format!("K_{}", -self.take_number())),
            DataType::Guid => Value::Guid(Uuid::new_v4()),
            other => {
                return Err(CoreError::TempKeyUnsupported {
                    type_name: type_name.to_string(),
                    data_type: other.name().to_string(),
                })
            }
        };
        Ok(value)
    }

    fn take_number(&mut self) -> i64 {
        let n = self.next_number;
        self.next_number -= 1;
        n
    }

    /// Records `key` as temporary.
    pub fn register(&mut self, key: EntityKey) {
        self.temp_keys.insert(key);
    }

    /// Forgets a temporary key. Returns true if it was known.
    pub fn unregister(&mut self, key: &EntityKey) -> bool {
        self.temp_keys.remove(key)
    }

    /// Returns true if `key` was minted here.
    pub fn is_temp_key(&self, key: &EntityKey) -> bool {
        self.temp_keys.contains(key)
    }

    /// Returns every temporary key, ordered by their display form.
    pub fn temp_keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.temp_keys.iter().cloned().collect();
        keys.sort_by_cached_key(ToString::to_string);
        keys
    }

    /// Returns the number of temporary keys.
    pub fn len(&self) -> usize {
        self.temp_keys.len()
    }

    /// Returns true if no temporary keys exist.
    pub fn is_empty(&self) -> bool {
        self.temp_keys.is_empty()
    }

    /// Forgets all temporary keys. The counter keeps going.
    pub fn clear(&mut self) {
        self.temp_keys.clear();
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_count_down() {
        let mut gen = KeyGenerator::new();
        assert_eq!(gen.generate("Order", DataType::Int32).unwrap(), Value::Integer(-1));
        assert_eq!(gen.generate("Order", DataType::Int32).unwrap(), Value::Integer(-2));
        assert_eq!(gen.generate("Item", DataType::Double).unwrap(), Value::Float(-3.0));
        assert_eq!(gen.generate("Tag", DataType::String).unwrap(), Value::from("K_4"));
    }

    #[test]
    fn guids_are_random() {
        let mut gen = KeyGenerator::new();
        let a = gen.generate("Customer", DataType::Guid).unwrap();
        let b = gen.generate("Customer", DataType::Guid).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unsupported_types() {
        let mut gen = KeyGenerator::new();
        let err = gen.generate("Event", DataType::DateTime).unwrap_err();
        assert!(matches!(err, CoreError::TempKeyUnsupported { .. }));
    }

    #[test]
    fn registry() {
        let mut gen = KeyGenerator::new();
        let key = EntityKey::new("Order", vec![Value::Integer(-1)]);
        assert!(!gen.is_temp_key(&key));
        gen.register(key.clone());
        assert!(gen.is_temp_key(&key));
        assert_eq!(gen.temp_keys(), vec![key.clone()]);
        assert!(gen.unregister(&key));
        assert!(gen.is_empty());
    }
}
