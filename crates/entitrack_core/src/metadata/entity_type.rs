//! Entity type descriptors.

use super::property::{DataProperty, NavigationProperty, PropertyDescriptor};
use serde::{Deserialize, Serialize};

/// How key values are produced for new entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AutoGeneratedKeyType {
    /// The application must supply key values.
    #[default]
    None,
    /// The backing store assigns keys; temp keys stand in until then.
    Identity,
    /// A client key generator assigns keys.
    KeyGenerator,
}

impl AutoGeneratedKeyType {
    /// Returns true unless keys are application supplied.
    pub fn generates_keys(&self) -> bool {
        !matches!(self, AutoGeneratedKeyType::None)
    }
}

/// Resolved reference to a property of an entity type.
#[derive(Debug, Clone, Copy)]
pub enum PropertyRef<'a> {
    /// Data property at the given index.
    Data(usize, &'a DataProperty),
    /// Navigation property at the given index.
    Navigation(usize, &'a NavigationProperty),
}

/// Describes an entity type: its data properties, key and navigations.
///
/// Types are built with the chained methods below and then registered
/// with a [`MetadataStore`](super::MetadataStore), which resolves complex
/// types, foreign keys and inverse navigations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityType {
    name: String,
    #[serde(default)]
    auto_generated_key_type: AutoGeneratedKeyType,
    data_properties: Vec<DataProperty>,
    #[serde(default)]
    navigation_properties: Vec<NavigationProperty>,
}

impl EntityType {
    /// Creates an entity type with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_generated_key_type: AutoGeneratedKeyType::None,
            data_properties: Vec::new(),
            navigation_properties: Vec::new(),
        }
    }

    /// Adds a data property.
    #[must_use]
    pub fn data_property(mut self, property: DataProperty) -> Self {
        self.data_properties.push(property);
        self
    }

    /// Adds a navigation property.
    #[must_use]
    pub fn navigation_property(mut self, property: NavigationProperty) -> Self {
        self.navigation_properties.push(property);
        self
    }

    /// Sets how keys are generated.
    #[must_use]
    pub fn auto_generated_key(mut self, kind: AutoGeneratedKeyType) -> Self {
        self.auto_generated_key_type = kind;
        self
    }

    /// Returns the type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key generation mode.
    pub fn auto_generated_key_type(&self) -> AutoGeneratedKeyType {
        self.auto_generated_key_type
    }

    /// Returns the data properties in declaration order.
    pub fn data_properties(&self) -> &[DataProperty] {
        &self.data_properties
    }

    /// Returns the navigation properties in declaration order.
    pub fn navigation_properties(&self) -> &[NavigationProperty] {
        &self.navigation_properties
    }

    /// Returns the key properties in declaration order.
    pub fn key_properties(&self) -> impl Iterator<Item = &DataProperty> {
        self.data_properties.iter().filter(|p| p.is_part_of_key())
    }

    /// Returns the indices of the key properties.
    pub fn key_property_indices(&self) -> Vec<usize> {
        self.data_properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_part_of_key())
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns the foreign key properties.
    pub fn foreign_key_properties(&self) -> impl Iterator<Item = &DataProperty> {
        self.data_properties.iter().filter(|p| p.is_foreign_key())
    }

    /// Returns the unmapped properties.
    pub fn unmapped_properties(&self) -> impl Iterator<Item = &DataProperty> {
        self.data_properties.iter().filter(|p| p.is_unmapped())
    }

    /// Returns the index of a data property.
    pub fn data_property_index(&self, name: &str) -> Option<usize> {
        self.data_properties.iter().position(|p| p.name() == name)
    }

    /// Looks up a data property.
    pub fn data_property_named(&self, name: &str) -> Option<&DataProperty> {
        self.data_properties.iter().find(|p| p.name() == name)
    }

    /// Returns the index of a navigation property.
    pub fn navigation_index(&self, name: &str) -> Option<usize> {
        self.navigation_properties.iter().position(|p| p.name() == name)
    }

    /// Looks up a navigation property.
    pub fn navigation_named(&self, name: &str) -> Option<&NavigationProperty> {
        self.navigation_properties.iter().find(|p| p.name() == name)
    }

    /// Resolves a property name to a data or navigation property.
    pub fn property(&self, name: &str) -> Option<PropertyRef<'_>> {
        if let Some(i) = self.data_property_index(name) {
            return Some(PropertyRef::Data(i, &self.data_properties[i]));
        }
        self.navigation_index(name)
            .map(|i| PropertyRef::Navigation(i, &self.navigation_properties[i]))
    }

    /// Resolves a property name to an owned descriptor.
    pub fn property_descriptor(&self, name: &str) -> Option<PropertyDescriptor> {
        match self.property(name)? {
            PropertyRef::Data(_, p) => Some(PropertyDescriptor::Data(p.clone())),
            PropertyRef::Navigation(_, p) => Some(PropertyDescriptor::Navigation(p.clone())),
        }
    }

    pub(crate) fn data_properties_mut(&mut self) -> &mut Vec<DataProperty> {
        &mut self.data_properties
    }

    pub(crate) fn navigation_properties_mut(&mut self) -> &mut Vec<NavigationProperty> {
        &mut self.navigation_properties
    }
}
