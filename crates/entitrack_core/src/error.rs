//! Error types for entitrack core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in entitrack core operations.
///
/// Validation failures are not errors: they are collected on the entity
/// aspect and returned as data.
#[derive(Debug, Error)]
pub enum CoreError {
    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] entitrack_codec::CodecError),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another entity with the same key is already in the cache.
    #[error(
        "an entity with key {key} is already attached; MergeStrategy Disallowed does not \
         allow attaching another instance with the same key"
    )]
    DuplicateKey {
        /// The colliding key.
        key: String,
    },

    /// The entity belongs to another manager.
    #[error(
        "entity {key} is attached to another EntityManager; an entity can only be attached \
         to one EntityManager at a time, detach it first"
    )]
    CrossManagerAttach {
        /// Key of the entity being attached.
        key: String,
    },

    /// The entity was created from a different metadata store.
    #[error(
        "cannot attach entity of type {type_name}: its MetadataStore does not match this \
         EntityManager's MetadataStore"
    )]
    ForeignMetadataStore {
        /// The entity's type.
        type_name: String,
    },

    /// Key values are unset and the type does not generate keys.
    #[error(
        "cannot add an entity of type {type_name} without first setting its key ({key_names}) \
         or declaring an auto-generated key"
    )]
    MissingKey {
        /// The entity's type.
        type_name: String,
        /// Comma separated key property names.
        key_names: String,
    },

    /// Temp keys cannot be generated for composite keys.
    #[error("temporary key generation is not supported for multipart keys (type {type_name})")]
    MultipartKeyUnsupported {
        /// The entity's type.
        type_name: String,
    },

    /// Temp keys cannot be generated for this key data type.
    #[error("cannot generate a temporary key of data type {data_type} for type {type_name}")]
    TempKeyUnsupported {
        /// The entity's type.
        type_name: String,
        /// The key property's data type.
        data_type: String,
    },

    /// Incoming data collided with a cached entity under `Disallowed`.
    #[error("MergeStrategy Disallowed prevents merging {key}: an entity with this key is already cached")]
    MergeConflict {
        /// The colliding key.
        key: String,
    },

    /// Entity type name not found in the metadata store.
    #[error("unknown entity type: {name}")]
    UnknownEntityType {
        /// The unrecognized name.
        name: String,
    },

    /// Property name not declared on the type.
    #[error("unknown property '{property}' on type {type_name}")]
    UnknownProperty {
        /// The entity or complex type.
        type_name: String,
        /// The unrecognized property name.
        property: String,
    },

    /// State-group name not recognized.
    #[error("unknown entity state: {name}")]
    UnknownEntityState {
        /// The unrecognized name.
        name: String,
    },

    /// A value could not be converted to the property's data type.
    #[error("invalid value for property '{property}': {message}")]
    InvalidValue {
        /// The property being set.
        property: String,
        /// Why the value was rejected.
        message: String,
    },

    /// Metadata definition is inconsistent.
    #[error("invalid metadata: {message}")]
    InvalidMetadata {
        /// Description of the problem.
        message: String,
    },

    /// An import was rejected before any entity was merged.
    #[error("import rejected: {message}")]
    ImportRejected {
        /// Reason given by the version check.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            property: property.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid metadata error.
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            message: message.into(),
        }
    }

    /// Creates an import rejected error.
    pub fn import_rejected(message: impl Into<String>) -> Self {
        Self::ImportRejected {
            message: message.into(),
        }
    }

    /// Creates an unknown entity type error.
    pub fn unknown_entity_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType { name: name.into() }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(type_name: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            type_name: type_name.into(),
            property: property.into(),
        }
    }

    /// Returns true for identity errors (duplicate key, cross-manager or
    /// cross-metadata attach).
    pub fn is_identity_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateKey { .. }
                | Self::CrossManagerAttach { .. }
                | Self::ForeignMetadataStore { .. }
        )
    }

    /// Returns true for key errors (missing key, unsupported temp key).
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Self::MissingKey { .. }
                | Self::MultipartKeyUnsupported { .. }
                | Self::TempKeyUnsupported { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = CoreError::unknown_entity_type("OrderDetXXX");
        assert!(err.to_string().contains("OrderDetXXX"));

        let err = CoreError::DuplicateKey {
            key: "Customer:(1)".into(),
        };
        assert!(err.to_string().contains("key"));
        assert!(err.to_string().contains("Customer:(1)"));

        let err = CoreError::MultipartKeyUnsupported {
            type_name: "OrderDetail".into(),
        };
        assert!(err.to_string().contains("multipart keys"));
    }

    #[test]
    fn taxonomy_predicates() {
        assert!(CoreError::CrossManagerAttach { key: "k".into() }.is_identity_error());
        assert!(CoreError::ForeignMetadataStore {
            type_name: "Order".into()
        }
        .is_identity_error());
        assert!(CoreError::MissingKey {
            type_name: "OrderDetail".into(),
            key_names: "orderID, productID".into(),
        }
        .is_key_error());
        assert!(!CoreError::invalid_operation("x").is_key_error());
    }
}
