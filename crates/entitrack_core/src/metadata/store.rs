//! Metadata store: the registry of entity and complex types.

use super::complex_type::ComplexType;
use super::entity_type::EntityType;
use super::property::{DataProperty, PropertyDescriptor};
use crate::entity::{Entity, PropertyValue};
use crate::error::{CoreError, CoreResult};
use crate::types::StoreId;
use crate::validation::Validator;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hook run once on every entity built by [`MetadataStore::create_entity`].
pub type Initializer = Arc<dyn Fn(&Entity) -> CoreResult<()> + Send + Sync>;

/// Serializable copy of a store's type definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    /// Store name (used as the metadata version tag).
    pub name: String,
    /// Complex types, in name order.
    #[serde(default)]
    pub complex_types: Vec<ComplexType>,
    /// Entity types, in name order.
    pub entity_types: Vec<EntityType>,
}

struct StoreInner {
    name: String,
    entity_types: BTreeMap<String, Arc<EntityType>>,
    complex_types: BTreeMap<String, Arc<ComplexType>>,
    initializers: HashMap<String, Initializer>,
    validators: HashMap<String, Vec<Arc<dyn Validator>>>,
}

/// Registry of entity types shared by managers and entities.
///
/// Stores are held behind an `Arc`; every entity keeps a handle to the
/// store it was created from, and a manager only accepts entities whose
/// store is its own.
pub struct MetadataStore {
    id: StoreId,
    inner: RwLock<StoreInner>,
}

impl MetadataStore {
    /// Creates an empty store. `name` doubles as the metadata version tag
    /// written into exports.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: StoreId::next(),
            inner: RwLock::new(StoreInner {
                name: name.into(),
                entity_types: BTreeMap::new(),
                complex_types: BTreeMap::new(),
                initializers: HashMap::new(),
                validators: HashMap::new(),
            }),
        }
    }

    /// Rebuilds a store from a snapshot.
    pub fn from_snapshot(snapshot: MetadataSnapshot) -> CoreResult<Self> {
        let store = Self::new(snapshot.name);
        for ct in snapshot.complex_types {
            store.add_complex_type(ct)?;
        }
        for et in snapshot.entity_types {
            store.add_entity_type(et)?;
        }
        Ok(store)
    }

    /// Returns the store id.
    pub fn id(&self) -> StoreId {
        self.id
    }

    /// Returns the store name.
    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    /// Registers a complex type. Must precede any entity type using it.
    pub fn add_complex_type(&self, complex_type: ComplexType) -> CoreResult<()> {
        if complex_type.data_properties().iter().any(DataProperty::is_complex) {
            return Err(CoreError::invalid_metadata(format!(
                "complex type {} cannot nest complex properties",
                complex_type.name()
            )));
        }
        let mut inner = self.inner.write();
        if inner.complex_types.contains_key(complex_type.name()) {
            return Err(CoreError::invalid_metadata(format!(
                "complex type {} is already registered",
                complex_type.name()
            )));
        }
        debug!(complex_type = complex_type.name(), "registered complex type");
        inner
            .complex_types
            .insert(complex_type.name().to_string(), Arc::new(complex_type));
        Ok(())
    }

    /// Registers an entity type.
    ///
    /// Resolves complex properties, marks foreign keys with their scalar
    /// navigation and completes inverse navigations in both directions.
    pub fn add_entity_type(&self, mut entity_type: EntityType) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let name = entity_type.name().to_string();
        if inner.entity_types.contains_key(&name) {
            return Err(CoreError::invalid_metadata(format!(
                "entity type {name} is already registered"
            )));
        }
        if entity_type.key_properties().next().is_none() {
            return Err(CoreError::invalid_metadata(format!(
                "entity type {name} declares no key properties"
            )));
        }
        for nav in entity_type.navigation_properties() {
            if entity_type.data_property_index(nav.name()).is_some() {
                return Err(CoreError::invalid_metadata(format!(
                    "{name}.{} is declared as both a data and a navigation property",
                    nav.name()
                )));
            }
        }

        for prop in entity_type.data_properties_mut().iter_mut() {
            if let Some(ct_name) = prop.complex_type_name() {
                let ct = inner.complex_types.get(ct_name).cloned().ok_or_else(|| {
                    CoreError::invalid_metadata(format!(
                        "{name}.{} refers to unknown complex type {ct_name}",
                        prop.name()
                    ))
                })?;
                prop.resolve_complex_type(ct);
            }
        }

        let fk_links: Vec<(String, String)> = entity_type
            .navigation_properties()
            .iter()
            .filter(|nav| nav.is_scalar())
            .flat_map(|nav| {
                nav.foreign_key_names()
                    .iter()
                    .map(move |fk| (fk.clone(), nav.name().to_string()))
            })
            .collect();
        for (fk, nav_name) in fk_links {
            let prop = entity_type
                .data_properties_mut()
                .iter_mut()
                .find(|p| p.name() == fk)
                .ok_or_else(|| {
                    CoreError::invalid_metadata(format!(
                        "{name}.{nav_name} names unknown foreign key {fk}"
                    ))
                })?;
            prop.set_related_navigation(Some(nav_name));
        }

        inner.entity_types.insert(name.clone(), Arc::new(entity_type));
        Self::link_inverses(&mut inner);
        debug!(entity_type = %name, "registered entity type");
        Ok(())
    }

    /// Fills in inverse names and inverse foreign keys that only one side
    /// of an association declares.
    fn link_inverses(inner: &mut StoreInner) {
        let mut inverses = Vec::new();
        let mut inverse_fks = Vec::new();
        for et in inner.entity_types.values() {
            for nav in et.navigation_properties() {
                let Some(inv) = nav.inverse_name() else {
                    continue;
                };
                let Some(target) = inner.entity_types.get(nav.entity_type_name()) else {
                    continue;
                };
                let Some(target_nav) = target.navigation_named(inv) else {
                    continue;
                };
                if target_nav.inverse_name().is_none() {
                    inverses.push((
                        target.name().to_string(),
                        inv.to_string(),
                        nav.name().to_string(),
                    ));
                }
                if !nav.is_scalar()
                    && nav.inverse_foreign_key_names().is_empty()
                    && !target_nav.foreign_key_names().is_empty()
                {
                    inverse_fks.push((
                        et.name().to_string(),
                        nav.name().to_string(),
                        target_nav.foreign_key_names().to_vec(),
                    ));
                }
                if nav.is_scalar()
                    && !nav.foreign_key_names().is_empty()
                    && !target_nav.is_scalar()
                    && target_nav.inverse_foreign_key_names().is_empty()
                {
                    inverse_fks.push((
                        target.name().to_string(),
                        inv.to_string(),
                        nav.foreign_key_names().to_vec(),
                    ));
                }
            }
        }
        for (type_name, nav_name, inverse) in inverses {
            if let Some(et) = inner.entity_types.get_mut(&type_name) {
                let et = Arc::make_mut(et);
                if let Some(nav) = et
                    .navigation_properties_mut()
                    .iter_mut()
                    .find(|n| n.name() == nav_name)
                {
                    nav.set_inverse(inverse);
                }
            }
        }
        for (type_name, nav_name, fks) in inverse_fks {
            if let Some(et) = inner.entity_types.get_mut(&type_name) {
                let et = Arc::make_mut(et);
                if let Some(nav) = et
                    .navigation_properties_mut()
                    .iter_mut()
                    .find(|n| n.name() == nav_name)
                {
                    nav.set_inverse_foreign_keys(fks);
                }
            }
        }
    }

    /// Adds a data property to a registered type.
    ///
    /// Entities created before the call keep the previous shape.
    pub fn add_data_property(&self, type_name: &str, mut property: DataProperty) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if let Some(ct_name) = property.complex_type_name() {
            let ct = inner
                .complex_types
                .get(ct_name)
                .cloned()
                .ok_or_else(|| CoreError::invalid_metadata(format!("unknown complex type {ct_name}")))?;
            property.resolve_complex_type(ct);
        }
        let et = inner
            .entity_types
            .get_mut(type_name)
            .ok_or_else(|| CoreError::unknown_entity_type(type_name))?;
        if et.property(property.name()).is_some() {
            return Err(CoreError::invalid_metadata(format!(
                "{type_name}.{} already exists",
                property.name()
            )));
        }
        if property.is_part_of_key() {
            return Err(CoreError::invalid_metadata(format!(
                "cannot add key property {type_name}.{} after registration",
                property.name()
            )));
        }
        Arc::make_mut(et).data_properties_mut().push(property);
        Ok(())
    }

    /// Returns a registered entity type.
    pub fn entity_type(&self, name: &str) -> CoreResult<Arc<EntityType>> {
        self.find_entity_type(name)
            .ok_or_else(|| CoreError::unknown_entity_type(name))
    }

    /// Returns a registered entity type, if present.
    pub fn find_entity_type(&self, name: &str) -> Option<Arc<EntityType>> {
        self.inner.read().entity_types.get(name).cloned()
    }

    /// Returns all entity types in name order.
    pub fn entity_types(&self) -> Vec<Arc<EntityType>> {
        self.inner.read().entity_types.values().cloned().collect()
    }

    /// Returns a registered complex type.
    pub fn complex_type(&self, name: &str) -> CoreResult<Arc<ComplexType>> {
        self.inner
            .read()
            .complex_types
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::invalid_metadata(format!("unknown complex type {name}")))
    }

    /// Registers the initializer for a type, replacing any previous one.
    pub fn register_initializer<F>(&self, type_name: &str, initializer: F) -> CoreResult<()>
    where
        F: Fn(&Entity) -> CoreResult<()> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write();
        if !inner.entity_types.contains_key(type_name) {
            return Err(CoreError::unknown_entity_type(type_name));
        }
        inner
            .initializers
            .insert(type_name.to_string(), Arc::new(initializer));
        Ok(())
    }

    pub(crate) fn initializer(&self, type_name: &str) -> Option<Initializer> {
        self.inner.read().initializers.get(type_name).cloned()
    }

    /// Adds an entity-level validator for a type.
    pub fn add_validator(&self, type_name: &str, validator: Arc<dyn Validator>) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if !inner.entity_types.contains_key(type_name) {
            return Err(CoreError::unknown_entity_type(type_name));
        }
        inner
            .validators
            .entry(type_name.to_string())
            .or_default()
            .push(validator);
        Ok(())
    }

    /// Returns the validators registered for a type.
    pub fn validators(&self, type_name: &str) -> Vec<Arc<dyn Validator>> {
        self.inner
            .read()
            .validators
            .get(type_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Builds a detached entity of the named type.
    ///
    /// Properties start at their defaults, then `initial` values are
    /// applied in order (names the type does not declare are skipped with
    /// a warning), then the registered initializer runs.
    pub fn create_entity(
        self: &Arc<Self>,
        type_name: &str,
        initial: &[(&str, PropertyValue)],
    ) -> CoreResult<Entity> {
        let entity_type = self.entity_type(type_name)?;
        let entity = Entity::new(Arc::clone(self), Arc::clone(&entity_type));
        for (name, value) in initial {
            if entity_type.property(name).is_none() {
                warn!(entity_type = type_name, property = *name, "ignoring unknown initial value");
                continue;
            }
            entity.set_property(name, value.clone())?;
        }
        if let Some(init) = self.initializer(type_name) {
            init(&entity)?;
        }
        Ok(entity)
    }

    /// Resolves a dotted property path such as `order.customer.companyName`.
    ///
    /// Each segment but the last must be a scalar navigation or a complex
    /// property.
    pub fn resolve_property_path(&self, type_name: &str, path: &str) -> CoreResult<PropertyDescriptor> {
        let mut current = self.entity_type(type_name)?;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let descriptor = current
                .property_descriptor(segment)
                .ok_or_else(|| CoreError::unknown_property(current.name(), segment))?;
            let Some(next) = segments.peek() else {
                return Ok(descriptor);
            };
            match &descriptor {
                PropertyDescriptor::Navigation(nav) if nav.is_scalar() => {
                    current = self.entity_type(nav.entity_type_name())?;
                }
                PropertyDescriptor::Data(p) if p.is_complex() => {
                    let ct = p
                        .resolved_complex_type()
                        .cloned()
                        .ok_or_else(|| CoreError::invalid_metadata("unresolved complex type"))?;
                    let rest: Vec<&str> = segments.collect();
                    if rest.len() != 1 {
                        return Err(CoreError::unknown_property(ct.name(), rest.join(".")));
                    }
                    return ct
                        .property(rest[0])
                        .cloned()
                        .map(PropertyDescriptor::Data)
                        .ok_or_else(|| CoreError::unknown_property(ct.name(), rest[0]));
                }
                _ => {
                    return Err(CoreError::unknown_property(current.name(), format!("{segment}.{next}")));
                }
            }
        }
        Err(CoreError::unknown_property(type_name, path))
    }

    /// Copies the type definitions into a serializable snapshot.
    pub fn snapshot(&self) -> MetadataSnapshot {
        let inner = self.inner.read();
        MetadataSnapshot {
            name: inner.name.clone(),
            complex_types: inner.complex_types.values().map(|ct| (**ct).clone()).collect(),
            entity_types: inner.entity_types.values().map(|et| (**et).clone()).collect(),
        }
    }
}

impl fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MetadataStore")
            .field("id", &self.id)
            .field("name", &inner.name)
            .field("entity_types", &inner.entity_types.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DataType, NavigationProperty};

    fn store() -> MetadataStore {
        let store = MetadataStore::new("v1");
        store
            .add_entity_type(
                EntityType::new("Customer")
                    .data_property(DataProperty::new("customerID", DataType::Guid).key())
                    .data_property(DataProperty::new("companyName", DataType::String))
                    .navigation_property(NavigationProperty::collection("orders", "Order")),
            )
            .unwrap();
        store
            .add_entity_type(
                EntityType::new("Order")
                    .data_property(DataProperty::new("orderID", DataType::Int32).key())
                    .data_property(DataProperty::new("customerID", DataType::Guid))
                    .navigation_property(
                        NavigationProperty::scalar("customer", "Customer")
                            .foreign_keys(["customerID"])
                            .inverse("orders"),
                    ),
            )
            .unwrap();
        store
    }

    #[test]
    fn inverses_are_completed() {
        let store = store();
        let customer = store.entity_type("Customer").unwrap();
        let orders = customer.navigation_named("orders").unwrap();
        assert_eq!(orders.inverse_name(), Some("customer"));
        assert_eq!(orders.inverse_foreign_key_names(), ["customerID".to_string()]);

        let order = store.entity_type("Order").unwrap();
        let fk = order.data_property_named("customerID").unwrap();
        assert_eq!(fk.related_navigation(), Some("customer"));
    }

    #[test]
    fn rejects_bad_definitions() {
        let store = store();
        let err = store
            .add_entity_type(EntityType::new("Order").data_property(
                DataProperty::new("orderID", DataType::Int32).key(),
            ))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidMetadata { .. }));

        let err = store
            .add_entity_type(EntityType::new("Keyless"))
            .unwrap_err();
        assert!(err.to_string().contains("no key"));

        assert!(store.entity_type("OrderDetXXX").is_err());
    }

    #[test]
    fn property_paths() {
        let store = store();
        let p = store.resolve_property_path("Order", "customer.companyName").unwrap();
        assert_eq!(p.name(), "companyName");
        assert!(store.resolve_property_path("Order", "customer.nope").is_err());
        assert!(store.resolve_property_path("Order", "orderID.x").is_err());
    }

    #[test]
    fn snapshot_round_trip() {
        let store = store();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.name, "v1");
        assert_eq!(snapshot.entity_types.len(), 2);

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: MetadataSnapshot = serde_json::from_str(&json).unwrap();
        let rebuilt = MetadataStore::from_snapshot(back).unwrap();
        assert_ne!(rebuilt.id(), store.id());
        assert!(rebuilt.entity_type("Order").is_ok());
    }

    #[test]
    fn add_unmapped_property() {
        let store = store();
        store
            .add_data_property(
                "Customer",
                DataProperty::new("foo", DataType::Int32).unmapped().with_default(42),
            )
            .unwrap();
        let customer = store.entity_type("Customer").unwrap();
        assert_eq!(customer.unmapped_properties().count(), 1);
        assert!(store
            .add_data_property("Customer", DataProperty::new("foo", DataType::Int32))
            .is_err());
    }
}
