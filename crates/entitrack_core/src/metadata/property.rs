//! Data and navigation property descriptors.

use super::complex_type::ComplexType;
use super::data_type::DataType;
use crate::error::{CoreError, CoreResult};
use entitrack_codec::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Describes a scalar (or complex) data property of an entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataProperty {
    name: String,
    data_type: DataType,
    is_nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_value: Option<Value>,
    #[serde(default)]
    is_part_of_key: bool,
    #[serde(default)]
    is_unmapped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    complex_type_name: Option<String>,
    /// Scalar navigation this property is a foreign key for. Set when the
    /// owning type is registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    related_navigation: Option<String>,
    #[serde(skip)]
    complex_type: Option<Arc<ComplexType>>,
}

impl DataProperty {
    /// Creates a nullable data property.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_nullable: true,
            default_value: None,
            is_part_of_key: false,
            is_unmapped: false,
            max_length: None,
            complex_type_name: None,
            related_navigation: None,
            complex_type: None,
        }
    }

    /// Creates a property holding an instance of a complex type.
    pub fn complex(name: impl Into<String>, complex_type_name: impl Into<String>) -> Self {
        Self {
            is_nullable: false,
            complex_type_name: Some(complex_type_name.into()),
            ..Self::new(name, DataType::Complex)
        }
    }

    /// Marks the property as part of the key. Key properties are never
    /// nullable.
    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_part_of_key = true;
        self.is_nullable = false;
        self
    }

    /// Sets nullability.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.is_nullable = nullable;
        self
    }

    /// Sets an explicit default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Marks the property as client-only. Unmapped properties never make
    /// an entity Modified.
    #[must_use]
    pub fn unmapped(mut self) -> Self {
        self.is_unmapped = true;
        self
    }

    /// Sets the maximum text length checked by validation.
    #[must_use]
    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Returns the property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the data type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns true if the property accepts null.
    pub fn is_nullable(&self) -> bool {
        self.is_nullable
    }

    /// Returns true if the property is part of the entity key.
    pub fn is_part_of_key(&self) -> bool {
        self.is_part_of_key
    }

    /// Returns true for client-only properties.
    pub fn is_unmapped(&self) -> bool {
        self.is_unmapped
    }

    /// Returns the maximum text length, if declared.
    pub fn max_length_limit(&self) -> Option<usize> {
        self.max_length
    }

    /// Returns the complex type name for complex properties.
    pub fn complex_type_name(&self) -> Option<&str> {
        self.complex_type_name.as_deref()
    }

    /// Returns true if this property holds a complex type instance.
    pub fn is_complex(&self) -> bool {
        self.complex_type_name.is_some()
    }

    /// Returns the scalar navigation this property is a foreign key for.
    pub fn related_navigation(&self) -> Option<&str> {
        self.related_navigation.as_deref()
    }

    /// Returns true if this property is a foreign key.
    pub fn is_foreign_key(&self) -> bool {
        self.related_navigation.is_some()
    }

    /// Returns the value a fresh entity starts with.
    ///
    /// An explicit default wins; otherwise non-nullable properties get the
    /// data type's default and nullable ones start null.
    pub fn default_value(&self) -> Value {
        if let Some(ct) = &self.complex_type {
            return ct.default_instance();
        }
        match &self.default_value {
            Some(v) => v.clone(),
            None if self.is_nullable => Value::Null,
            None => self.data_type.default_value(),
        }
    }

    /// Converts an incoming value to this property's type.
    pub fn coerce(&self, value: Value) -> CoreResult<Value> {
        if let Some(ct) = &self.complex_type {
            return ct.coerce_instance(&self.name, value);
        }
        let value = match value {
            Value::Text(s) if s.is_empty() && self.data_type != DataType::String => Value::Null,
            other => other,
        };
        let value = self
            .data_type
            .coerce(value)
            .map_err(|message| CoreError::invalid_value(&self.name, message))?;
        if value.is_null() && !self.is_nullable {
            return Err(CoreError::invalid_value(
                &self.name,
                "null is not allowed for a non-nullable property",
            ));
        }
        Ok(value)
    }

    pub(crate) fn set_related_navigation(&mut self, nav: Option<String>) {
        self.related_navigation = nav;
    }

    pub(crate) fn resolve_complex_type(&mut self, ct: Arc<ComplexType>) {
        self.complex_type = Some(ct);
    }

    pub(crate) fn resolved_complex_type(&self) -> Option<&Arc<ComplexType>> {
        self.complex_type.as_ref()
    }
}

/// Describes a reference from one entity type to another.
///
/// Scalar navigations point at a single parent and usually carry the
/// foreign key names on the owning (child) type. Collection navigations
/// hold the children and name the foreign keys on the child type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationProperty {
    name: String,
    entity_type_name: String,
    is_scalar: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    foreign_key_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    inverse_foreign_key_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inverse: Option<String>,
}

impl NavigationProperty {
    /// Creates a scalar navigation to `target`.
    pub fn scalar(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type_name: target.into(),
            is_scalar: true,
            foreign_key_names: Vec::new(),
            inverse_foreign_key_names: Vec::new(),
            inverse: None,
        }
    }

    /// Creates a collection navigation of `target` entities.
    pub fn collection(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            is_scalar: false,
            ..Self::scalar(name, target)
        }
    }

    /// Sets the foreign key properties on this (owning) type.
    #[must_use]
    pub fn foreign_keys<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_key_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the foreign key properties on the target type.
    #[must_use]
    pub fn inverse_foreign_keys<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inverse_foreign_key_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Names the inverse navigation on the target type.
    #[must_use]
    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    /// Returns the property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the target entity type name.
    pub fn entity_type_name(&self) -> &str {
        &self.entity_type_name
    }

    /// Returns true for single-valued navigations.
    pub fn is_scalar(&self) -> bool {
        self.is_scalar
    }

    /// Foreign key names on the owning type.
    pub fn foreign_key_names(&self) -> &[String] {
        &self.foreign_key_names
    }

    /// Foreign key names on the target type.
    pub fn inverse_foreign_key_names(&self) -> &[String] {
        &self.inverse_foreign_key_names
    }

    /// Returns the inverse navigation name.
    pub fn inverse_name(&self) -> Option<&str> {
        self.inverse.as_deref()
    }

    pub(crate) fn set_inverse(&mut self, name: String) {
        self.inverse = Some(name);
    }

    pub(crate) fn set_inverse_foreign_keys(&mut self, names: Vec<String>) {
        self.inverse_foreign_key_names = names;
    }
}

/// A property resolved by name or path.
#[derive(Debug, Clone)]
pub enum PropertyDescriptor {
    /// A data property.
    Data(DataProperty),
    /// A navigation property.
    Navigation(NavigationProperty),
}

impl PropertyDescriptor {
    /// Returns the property name.
    pub fn name(&self) -> &str {
        match self {
            PropertyDescriptor::Data(p) => p.name(),
            PropertyDescriptor::Navigation(p) => p.name(),
        }
    }

    /// Returns true for navigation properties.
    pub fn is_navigation(&self) -> bool {
        matches!(self, PropertyDescriptor::Navigation(_))
    }
}
