//! # entitrack core
//!
//! In-memory change tracking for typed entities.
//!
//! This crate provides:
//! - Metadata descriptors: data types, properties, entity and complex types
//! - Entities with per-entity state, original values and notifications
//! - Relationship synchronization between navigations and foreign keys
//! - An identity-mapped entity manager with attach, detach and merge
//! - Temporary keys for entities whose keys the store assigns
//! - Export and import of cache contents as JSON or CBOR bundles
//!
//! ```rust,ignore
//! use entitrack_core::{EntityManager, MetadataStore};
//!
//! let em = EntityManager::with_metadata(store);
//! let customer = em.create_entity("Customer", &[("companyName", "Acme".into())])?;
//! let order = em.create_entity("Order", &[])?;
//! customer.get_collection("orders")?.push(&order)?;
//! assert_eq!(order.get_entity("customer")?, Some(customer));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entity;
mod error;
mod events;
mod key_generator;
mod manager;
mod merge;
pub mod metadata;
mod state;
mod types;
mod validation;

#[cfg(test)]
mod test_support;

pub use config::ManagerConfig;
pub use entity::{Entity, EntityAspect, EntityKey, PropertyValue, RelationArray};
pub use error::{CoreError, CoreResult};
pub use events::{
    ArrayChangedArgs, EntityAction, EntityChangedArgs, EventChannel, PropertyChangedArgs,
};
pub use key_generator::KeyGenerator;
pub use manager::{
    BundleHeader, EntityManager, ExportBundle, ExportOptions, ExportedEntity, ImportOptions,
    ImportResult, MetadataVersionFn, PropertyChangedSuppression, PropertySerializer,
    BUNDLE_FORMAT,
};
pub use merge::{resolve as resolve_merge, MergeAction, MergeStrategy};
pub use metadata::{
    AutoGeneratedKeyType, ComplexType, DataProperty, DataType, EntityType, MetadataSnapshot,
    MetadataStore, NavigationProperty, PropertyDescriptor,
};
pub use state::EntityState;
pub use types::{InstanceId, ManagerId, StoreId, SubscriptionToken};
pub use validation::{
    FnValidator, MaxLengthValidator, RequiredValidator, ValidationError, Validator,
};

pub use entitrack_codec::Value;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
