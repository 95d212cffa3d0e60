//! Entity validation.
//!
//! Validators are registered per entity type on the metadata store and
//! run by [`EntityAspect::validate_entity`](crate::EntityAspect::validate_entity).
//! Their findings are data, not errors: they are stored on the entity
//! aspect until the next validation or until cleared.

use crate::entity::Entity;
use crate::metadata::DataType;
use entitrack_codec::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// The property that failed, or `None` for entity-level failures.
    pub property_name: Option<String>,
    /// Name of the validator that produced the error.
    pub validator: String,
    /// Human readable message.
    pub message: String,
}

impl ValidationError {
    /// Creates an entity-level error.
    pub fn new(validator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property_name: None,
            validator: validator.into(),
            message: message.into(),
        }
    }

    /// Creates an error for one property.
    pub fn for_property(
        property: impl Into<String>,
        validator: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            property_name: Some(property.into()),
            validator: validator.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property_name {
            Some(p) => write!(f, "{p}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Checks an entity and reports failures.
pub trait Validator: Send + Sync {
    /// Returns the validator name.
    fn name(&self) -> &str;

    /// Returns every failure found; empty means valid.
    fn validate(&self, entity: &Entity) -> Vec<ValidationError>;
}

/// Flags non-nullable data properties holding null or empty text.
///
/// Key properties are skipped; key presence is enforced on attach.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredValidator;

impl Validator for RequiredValidator {
    fn name(&self) -> &str {
        "required"
    }

    fn validate(&self, entity: &Entity) -> Vec<ValidationError> {
        let entity_type = entity.entity_type();
        entity_type
            .data_properties()
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_nullable() && !p.is_part_of_key())
            .filter(|(i, p)| {
                let value = entity.value_at(*i);
                value.is_null()
                    || (p.data_type() == DataType::String
                        && value.as_text().is_some_and(str::is_empty))
            })
            .map(|(_, p)| {
                ValidationError::for_property(
                    p.name(),
                    self.name(),
                    format!("'{}' is required", p.name()),
                )
            })
            .collect()
    }
}

/// Flags text longer than a property's declared maximum length.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxLengthValidator;

impl Validator for MaxLengthValidator {
    fn name(&self) -> &str {
        "maxLength"
    }

    fn validate(&self, entity: &Entity) -> Vec<ValidationError> {
        let entity_type = entity.entity_type();
        let mut errors = Vec::new();
        for (i, prop) in entity_type.data_properties().iter().enumerate() {
            let Some(max) = prop.max_length_limit() else {
                continue;
            };
            if let Value::Text(text) = entity.value_at(i) {
                let len = text.chars().count();
                if len > max {
                    errors.push(ValidationError::for_property(
                        prop.name(),
                        self.name(),
                        format!("'{}' must be at most {max} characters (got {len})", prop.name()),
                    ));
                }
            }
        }
        errors
    }
}

/// Adapts a closure into a named validator.
pub struct FnValidator<F> {
    name: String,
    check: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&Entity) -> Vec<ValidationError> + Send + Sync,
{
    /// Wraps `check` under `name`.
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Entity) -> Vec<ValidationError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, entity: &Entity) -> Vec<ValidationError> {
        (self.check)(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DataProperty, EntityType, MetadataStore};
    use std::sync::Arc;

    fn store() -> Arc<MetadataStore> {
        let store = MetadataStore::new("v1");
        store
            .add_entity_type(
                EntityType::new("Supplier")
                    .data_property(DataProperty::new("supplierID", DataType::Int32).key())
                    .data_property(
                        DataProperty::new("companyName", DataType::String)
                            .nullable(false)
                            .max_length(5),
                    ),
            )
            .unwrap();
        Arc::new(store)
    }

    #[test]
    fn required_flags_empty_text() {
        let store = store();
        let supplier = store.create_entity("Supplier", &[]).unwrap();
        let errors = RequiredValidator.validate(&supplier);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].property_name.as_deref(), Some("companyName"));

        supplier.set_property("companyName", "Acme").unwrap();
        assert!(RequiredValidator.validate(&supplier).is_empty());
    }

    #[test]
    fn max_length() {
        let store = store();
        let supplier = store
            .create_entity("Supplier", &[("companyName", "Too long a name".into())])
            .unwrap();
        let errors = MaxLengthValidator.validate(&supplier);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("at most 5"));
    }

    #[test]
    fn closure_validator() {
        let store = store();
        let v = FnValidator::new("never", |_: &Entity| {
            vec![ValidationError::new("never", "always fails")]
        });
        let supplier = store.create_entity("Supplier", &[]).unwrap();
        assert_eq!(v.name(), "never");
        assert_eq!(v.validate(&supplier).len(), 1);
    }
}
