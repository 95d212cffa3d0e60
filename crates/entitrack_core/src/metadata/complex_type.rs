//! Complex (value object) types.

use super::property::DataProperty;
use crate::error::{CoreError, CoreResult};
use entitrack_codec::Value;
use serde::{Deserialize, Serialize};

/// A named group of data properties stored inline on an entity.
///
/// Instances are plain [`Value::Map`]s keyed by property name. They have
/// no identity and are never tracked on their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexType {
    name: String,
    data_properties: Vec<DataProperty>,
}

impl ComplexType {
    /// Creates an empty complex type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_properties: Vec::new(),
        }
    }

    /// Adds a data property.
    #[must_use]
    pub fn data_property(mut self, property: DataProperty) -> Self {
        self.data_properties.push(property);
        self
    }

    /// Returns the type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared properties.
    pub fn data_properties(&self) -> &[DataProperty] {
        &self.data_properties
    }

    /// Looks up a property by name.
    pub fn property(&self, name: &str) -> Option<&DataProperty> {
        self.data_properties.iter().find(|p| p.name() == name)
    }

    /// Builds an instance with every property at its default.
    pub fn default_instance(&self) -> Value {
        Value::text_map(
            self.data_properties
                .iter()
                .map(|p| (p.name().to_string(), p.default_value())),
        )
    }

    /// Builds an instance from defaults overlaid with `initial` values.
    pub fn create_instance(&self, initial: &[(&str, Value)]) -> CoreResult<Value> {
        let mut instance = self.default_instance();
        for (name, value) in initial {
            let prop = self
                .property(name)
                .ok_or_else(|| CoreError::unknown_property(&self.name, *name))?;
            instance.set(name, prop.coerce(value.clone())?);
        }
        Ok(instance)
    }

    /// Validates and normalizes an incoming instance for property
    /// `property_name`. Missing fields take their defaults.
    pub(crate) fn coerce_instance(&self, property_name: &str, value: Value) -> CoreResult<Value> {
        let Value::Map(pairs) = value else {
            return Err(CoreError::invalid_value(
                property_name,
                format!("expected an instance of {}", self.name),
            ));
        };
        let mut instance = self.default_instance();
        for (key, field) in pairs {
            let key = key.as_text().ok_or_else(|| {
                CoreError::invalid_value(property_name, "complex instance keys must be text")
            })?;
            let prop = self
                .property(key)
                .ok_or_else(|| CoreError::unknown_property(&self.name, key))?;
            instance.set(key, prop.coerce(field)?);
        }
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DataType;

    fn location() -> ComplexType {
        ComplexType::new("Location")
            .data_property(DataProperty::new("address", DataType::String))
            .data_property(DataProperty::new("city", DataType::String))
            .data_property(DataProperty::new("postalCode", DataType::String))
    }

    #[test]
    fn create_instance_overlays_defaults() {
        let ct = location();
        let inst = ct
            .create_instance(&[("address", Value::from("11 Main Street"))])
            .unwrap();
        assert_eq!(inst.get("address"), Some(&Value::from("11 Main Street")));
        assert_eq!(inst.get("city"), Some(&Value::Null));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let ct = location();
        let err = ct.create_instance(&[("street", Value::from("x"))]).unwrap_err();
        assert!(err.to_string().contains("street"));

        let err = ct.coerce_instance("location", Value::from(3)).unwrap_err();
        assert!(err.to_string().contains("Location"));
    }
}
