//! Entities: tracked instances of entity types.
//!
//! An [`Entity`] is a cheap, clonable handle. Clones share the same
//! instance; equality is identity. Property values, state and navigation
//! links live behind a lock inside the shared instance, and no lock is
//! held while listeners or other entities are called.

mod aspect;
mod key;
mod relation;

pub use aspect::EntityAspect;
pub use key::EntityKey;
pub use relation::RelationArray;
pub(crate) use relation::{link_silently, sever_relations, unlink_silently, SeverMode};

use crate::error::{CoreError, CoreResult};
use crate::events::{EntityAction, EventChannel, PropertyChangedArgs};
use crate::manager::{EntityManager, ManagerShared};
use crate::metadata::{DataProperty, EntityType, MetadataStore, PropertyRef};
use crate::state::EntityState;
use crate::types::InstanceId;
use crate::validation::ValidationError;
use chrono::{DateTime, Utc};
use entitrack_codec::Value;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Value of any property: data, scalar navigation or collection.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A data property value.
    Value(Value),
    /// A scalar navigation target.
    Entity(Option<Entity>),
    /// A collection navigation.
    Collection(RelationArray),
}

impl PropertyValue {
    /// Returns the data value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            PropertyValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the navigation target, if this is a set scalar navigation.
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            PropertyValue::Entity(e) => e.as_ref(),
            _ => None,
        }
    }

    /// Returns the relation array, if this is a collection.
    pub fn as_collection(&self) -> Option<&RelationArray> {
        match self {
            PropertyValue::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Consumes into a data value.
    pub fn into_value(self) -> Option<Value> {
        match self {
            PropertyValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true for null data values and unset navigations.
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Value(Value::Null) | PropertyValue::Entity(None))
    }
}

macro_rules! property_value_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for PropertyValue {
                fn from(v: $t) -> Self {
                    PropertyValue::Value(Value::from(v))
                }
            }
        )*
    };
}

property_value_from!(Value, &str, String, i64, i32, i16, f64, bool, DateTime<Utc>, Uuid, Vec<u8>);

impl From<Entity> for PropertyValue {
    fn from(e: Entity) -> Self {
        PropertyValue::Entity(Some(e))
    }
}

impl From<&Entity> for PropertyValue {
    fn from(e: &Entity) -> Self {
        PropertyValue::Entity(Some(e.clone()))
    }
}

impl From<Option<Entity>> for PropertyValue {
    fn from(e: Option<Entity>) -> Self {
        PropertyValue::Entity(e)
    }
}

impl From<RelationArray> for PropertyValue {
    fn from(r: RelationArray) -> Self {
        PropertyValue::Collection(r)
    }
}

/// How a write treats change tracking and foreign keys.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WriteMode {
    /// Record original values and move Unchanged to Modified.
    pub track: bool,
    /// Navigation writes update the foreign key.
    pub sync_fk: bool,
}

impl WriteMode {
    /// Application writes.
    pub const USER: Self = Self {
        track: true,
        sync_fk: true,
    };
    /// Restoring original values.
    pub const RESTORE: Self = Self {
        track: false,
        sync_fk: true,
    };

    pub fn without_fk_sync(self) -> Self {
        Self {
            sync_fk: false,
            ..self
        }
    }
}

pub(crate) struct AspectData {
    pub(crate) state: EntityState,
    pub(crate) manager: Option<Weak<ManagerShared>>,
    pub(crate) values: Vec<Value>,
    pub(crate) original_values: BTreeMap<String, Value>,
    pub(crate) references: Vec<Option<Entity>>,
    pub(crate) validation_errors: Vec<ValidationError>,
    in_process: HashSet<String>,
}

pub(crate) struct EntityInner {
    instance_id: InstanceId,
    metadata: Arc<MetadataStore>,
    entity_type: Arc<EntityType>,
    pub(crate) data: RwLock<AspectData>,
    property_changed: EventChannel<PropertyChangedArgs>,
    collections: Vec<Option<RelationArray>>,
}

/// Handle to a tracked entity instance.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

/// Releases an in-process mark when dropped.
pub(crate) struct InProcessGuard<'a> {
    entity: &'a Entity,
    name: String,
}

impl Drop for InProcessGuard<'_> {
    fn drop(&mut self) {
        self.entity.inner.data.write().in_process.remove(&self.name);
    }
}

impl Entity {
    /// Builds a detached entity with every property at its default.
    pub(crate) fn new(metadata: Arc<MetadataStore>, entity_type: Arc<EntityType>) -> Self {
        let values = entity_type
            .data_properties()
            .iter()
            .map(DataProperty::default_value)
            .collect();
        let nav_count = entity_type.navigation_properties().len();
        let inner = Arc::new_cyclic(|weak: &Weak<EntityInner>| {
            let collections = entity_type
                .navigation_properties()
                .iter()
                .enumerate()
                .map(|(i, nav)| (!nav.is_scalar()).then(|| RelationArray::new(weak.clone(), i)))
                .collect();
            EntityInner {
                instance_id: InstanceId::next(),
                metadata,
                entity_type,
                data: RwLock::new(AspectData {
                    state: EntityState::Detached,
                    manager: None,
                    values,
                    original_values: BTreeMap::new(),
                    references: vec![None; nav_count],
                    validation_errors: Vec::new(),
                    in_process: HashSet::new(),
                }),
                property_changed: EventChannel::new(),
                collections,
            }
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<EntityInner>) -> Self {
        Self { inner }
    }

    /// Returns the instance id.
    pub fn instance_id(&self) -> InstanceId {
        self.inner.instance_id
    }

    /// Returns the entity type.
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.inner.entity_type
    }

    /// Returns the entity type name.
    pub fn type_name(&self) -> &str {
        self.inner.entity_type.name()
    }

    /// Returns the store this entity was created from.
    pub fn metadata_store(&self) -> &Arc<MetadataStore> {
        &self.inner.metadata
    }

    /// Returns the change-tracking aspect.
    pub fn aspect(&self) -> EntityAspect<'_> {
        EntityAspect::new(self)
    }

    /// Returns the current key.
    pub fn key(&self) -> EntityKey {
        let entity_type = &self.inner.entity_type;
        let data = self.inner.data.read();
        EntityKey::new(
            entity_type.name(),
            entity_type
                .key_property_indices()
                .into_iter()
                .map(|i| data.values[i].clone())
                .collect(),
        )
    }

    /// Reads any property.
    pub fn get_property(&self, name: &str) -> CoreResult<PropertyValue> {
        match self.inner.entity_type.property(name) {
            Some(PropertyRef::Data(i, _)) => Ok(PropertyValue::Value(self.value_at(i))),
            Some(PropertyRef::Navigation(i, nav)) if nav.is_scalar() => {
                Ok(PropertyValue::Entity(self.reference(i)))
            }
            Some(PropertyRef::Navigation(i, _)) => self
                .collection_at(i)
                .cloned()
                .map(PropertyValue::Collection)
                .ok_or_else(|| CoreError::unknown_property(self.type_name(), name)),
            None => Err(CoreError::unknown_property(self.type_name(), name)),
        }
    }

    /// Reads a data property.
    pub fn get_value(&self, name: &str) -> CoreResult<Value> {
        self.inner
            .entity_type
            .data_property_index(name)
            .map(|i| self.value_at(i))
            .ok_or_else(|| CoreError::unknown_property(self.type_name(), name))
    }

    /// Reads a scalar navigation property.
    pub fn get_entity(&self, name: &str) -> CoreResult<Option<Entity>> {
        match self.inner.entity_type.property(name) {
            Some(PropertyRef::Navigation(i, nav)) if nav.is_scalar() => Ok(self.reference(i)),
            _ => Err(CoreError::unknown_property(self.type_name(), name)),
        }
    }

    /// Reads a collection navigation property.
    pub fn get_collection(&self, name: &str) -> CoreResult<RelationArray> {
        self.inner
            .entity_type
            .navigation_index(name)
            .and_then(|i| self.collection_at(i).cloned())
            .ok_or_else(|| CoreError::unknown_property(self.type_name(), name))
    }

    /// Reads a dotted path through scalar navigations and complex
    /// properties, such as `order.customer.companyName` or
    /// `location.city`.
    ///
    /// An unset navigation along the way yields a null value.
    pub fn get_property_path(&self, path: &str) -> CoreResult<PropertyValue> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = self.get_property(head)?;
        let Some(rest) = rest else {
            return Ok(value);
        };
        match value {
            PropertyValue::Entity(Some(next)) => next.get_property_path(rest),
            PropertyValue::Entity(None) => Ok(PropertyValue::Value(Value::Null)),
            PropertyValue::Value(v @ Value::Map(_)) => v
                .get(rest)
                .cloned()
                .map(PropertyValue::Value)
                .ok_or_else(|| CoreError::unknown_property(head, rest)),
            _ => Err(CoreError::unknown_property(self.type_name(), path)),
        }
    }

    /// Sets any assignable property.
    ///
    /// Data values are coerced to the declared type. Scalar navigations
    /// accept an entity or null and keep the inverse side and foreign keys
    /// in step. Collections cannot be assigned; use the
    /// [`RelationArray`] instead.
    pub fn set_property(&self, name: &str, value: impl Into<PropertyValue>) -> CoreResult<()> {
        let value = value.into();
        let entity_type = Arc::clone(&self.inner.entity_type);
        match entity_type.property(name) {
            Some(PropertyRef::Data(i, _)) => match value {
                PropertyValue::Value(v) => self.write_data(i, v, WriteMode::USER),
                PropertyValue::Entity(_) | PropertyValue::Collection(_) => Err(
                    CoreError::invalid_value(name, "expected a data value, not an entity"),
                ),
            },
            Some(PropertyRef::Navigation(i, nav)) if nav.is_scalar() => match value {
                PropertyValue::Entity(target) => {
                    relation::set_reference(self, i, target, WriteMode::USER)
                }
                PropertyValue::Value(Value::Null) => {
                    relation::set_reference(self, i, None, WriteMode::USER)
                }
                _ => Err(CoreError::invalid_value(name, "expected an entity or null")),
            },
            Some(PropertyRef::Navigation(..)) => Err(CoreError::invalid_operation(format!(
                "collection property '{name}' cannot be assigned; add to or remove from it instead"
            ))),
            None => Err(CoreError::unknown_property(self.type_name(), name)),
        }
    }

    /// Sets a field inside a complex property, e.g. `location.city`.
    pub fn set_property_path(&self, path: &str, value: impl Into<PropertyValue>) -> CoreResult<()> {
        let Some((head, field)) = path.split_once('.') else {
            return self.set_property(path, value);
        };
        let entity_type = Arc::clone(&self.inner.entity_type);
        match entity_type.property(head) {
            Some(PropertyRef::Data(i, prop)) if prop.is_complex() => {
                let value: PropertyValue = value.into();
                let Some(field_value) = value.into_value() else {
                    return Err(CoreError::invalid_value(path, "expected a data value"));
                };
                let mut instance = self.value_at(i);
                if !instance.set(field, field_value) {
                    return Err(CoreError::invalid_value(head, "complex value is not a map"));
                }
                self.write_data(i, instance, WriteMode::USER)
            }
            Some(PropertyRef::Navigation(i, nav)) if nav.is_scalar() => match self.reference(i) {
                Some(next) => next.set_property_path(field, value),
                None => Err(CoreError::invalid_operation(format!(
                    "cannot set '{path}': navigation '{head}' is not set"
                ))),
            },
            _ => Err(CoreError::unknown_property(self.type_name(), path)),
        }
    }

    pub(crate) fn value_at(&self, index: usize) -> Value {
        self.inner.data.read().values[index].clone()
    }

    pub(crate) fn values_by_name(&self) -> BTreeMap<String, Value> {
        let data = self.inner.data.read();
        self.inner
            .entity_type
            .data_properties()
            .iter()
            .zip(data.values.iter())
            .map(|(p, v)| (p.name().to_string(), v.clone()))
            .collect()
    }

    pub(crate) fn reference(&self, nav_index: usize) -> Option<Entity> {
        self.inner.data.read().references[nav_index].clone()
    }

    pub(crate) fn set_reference_raw(&self, nav_index: usize, target: Option<Entity>) -> Option<Entity> {
        std::mem::replace(&mut self.inner.data.write().references[nav_index], target)
    }

    pub(crate) fn collection_at(&self, nav_index: usize) -> Option<&RelationArray> {
        self.inner.collections.get(nav_index).and_then(Option::as_ref)
    }

    pub(crate) fn state(&self) -> EntityState {
        self.inner.data.read().state
    }

    pub(crate) fn set_state(&self, state: EntityState) -> EntityState {
        std::mem::replace(&mut self.inner.data.write().state, state)
    }

    /// Moves Unchanged to Modified. Returns true if the state changed.
    pub(crate) fn mark_modified(&self) -> bool {
        let changed = {
            let mut data = self.inner.data.write();
            if data.state.is_unchanged() {
                data.state = EntityState::Modified;
                true
            } else {
                false
            }
        };
        if changed {
            self.notify_manager(EntityAction::EntityStateChange);
        }
        changed
    }

    pub(crate) fn manager(&self) -> Option<EntityManager> {
        self.inner
            .data
            .read()
            .manager
            .as_ref()
            .and_then(Weak::upgrade)
            .map(EntityManager::from_shared)
    }

    pub(crate) fn set_manager(&self, manager: Option<Weak<ManagerShared>>) {
        self.inner.data.write().manager = manager;
    }

    pub(crate) fn original_values(&self) -> BTreeMap<String, Value> {
        self.inner.data.read().original_values.clone()
    }

    pub(crate) fn set_original_values(&self, originals: BTreeMap<String, Value>) {
        self.inner.data.write().original_values = originals;
    }

    pub(crate) fn property_changed_channel(&self) -> &EventChannel<PropertyChangedArgs> {
        &self.inner.property_changed
    }

    /// Key this entity would have with `value` at data property `index`.
    pub(crate) fn key_with(&self, index: usize, value: &Value) -> EntityKey {
        self.key_with_all(&[(index, value.clone())])
    }

    pub(crate) fn key_with_all(&self, replacements: &[(usize, Value)]) -> EntityKey {
        let entity_type = &self.inner.entity_type;
        let data = self.inner.data.read();
        EntityKey::new(
            entity_type.name(),
            entity_type
                .key_property_indices()
                .into_iter()
                .map(|i| {
                    replacements
                        .iter()
                        .find(|(r, _)| *r == i)
                        .map_or_else(|| data.values[i].clone(), |(_, v)| v.clone())
                })
                .collect(),
        )
    }

    /// Parent key named by the foreign keys of scalar navigation
    /// `nav_index`, or `None` when there are no foreign keys or one is null.
    pub(crate) fn foreign_key(&self, nav_index: usize) -> Option<EntityKey> {
        let entity_type = &self.inner.entity_type;
        let nav = &entity_type.navigation_properties()[nav_index];
        if nav.foreign_key_names().is_empty() {
            return None;
        }
        let data = self.inner.data.read();
        let values = nav
            .foreign_key_names()
            .iter()
            .map(|fk| entity_type.data_property_index(fk).map(|i| data.values[i].clone()))
            .collect::<Option<Vec<_>>>()?;
        if values.iter().any(Value::is_null) {
            return None;
        }
        Some(EntityKey::new(nav.entity_type_name(), values))
    }

    pub(crate) fn is_in_process(&self, name: &str) -> bool {
        self.inner.data.read().in_process.contains(name)
    }

    /// Marks `name` as being written. Returns `None` if it already is.
    pub(crate) fn enter(&self, name: &str) -> Option<InProcessGuard<'_>> {
        let inserted = self.inner.data.write().in_process.insert(name.to_string());
        inserted.then(|| InProcessGuard {
            entity: self,
            name: name.to_string(),
        })
    }

    /// Writes a data property, running the full change pipeline: coercion,
    /// key checks, original-value tracking, state change, notification,
    /// key re-indexing and navigation sync from foreign keys.
    pub(crate) fn write_data(&self, index: usize, value: Value, mode: WriteMode) -> CoreResult<()> {
        let entity_type = Arc::clone(&self.inner.entity_type);
        let prop = &entity_type.data_properties()[index];
        let value = prop.coerce(value)?;
        let (old, state) = {
            let data = self.inner.data.read();
            (data.values[index].clone(), data.state)
        };
        if old == value {
            return Ok(());
        }
        let manager = self.manager();
        if prop.is_part_of_key() {
            if mode.track && state.is_persisted() {
                return Err(CoreError::invalid_operation(format!(
                    "cannot change key property '{}' of {} entity {}",
                    prop.name(),
                    state,
                    self.key()
                )));
            }
            if let Some(manager) = &manager {
                manager.ensure_key_available(&self.key_with(index, &value), self)?;
            }
        }
        let Some(_guard) = self.enter(prop.name()) else {
            return Ok(());
        };
        let old_key = prop.is_part_of_key().then(|| self.key());
        let became_modified = {
            let mut data = self.inner.data.write();
            data.values[index] = value.clone();
            let mut changed = false;
            if mode.track && !prop.is_unmapped() && data.state.is_persisted() {
                data.original_values
                    .entry(prop.name().to_string())
                    .or_insert_with(|| old.clone());
                if data.state.is_unchanged() {
                    data.state = EntityState::Modified;
                    changed = true;
                }
            }
            changed
        };
        self.publish_property_changed(
            Some(prop.name()),
            PropertyValue::Value(old),
            PropertyValue::Value(value),
        );
        if let Some(manager) = &manager {
            if became_modified {
                manager.notify(EntityAction::EntityStateChange, Some(self));
            }
            if mode.track && manager.config().validate_on_property_change {
                self.aspect().validate_entity();
            }
        }
        if let Some(old_key) = old_key {
            relation::on_key_changed(self, &old_key)?;
        }
        if let Some(nav_name) = prop.related_navigation() {
            if let Some(nav_index) = entity_type.navigation_index(nav_name) {
                relation::sync_reference_from_fk(self, nav_index, mode)?;
            }
        }
        Ok(())
    }

    /// Replaces data values without events or tracking. Returns the
    /// indices that changed. Key properties are left alone.
    pub(crate) fn write_values_raw(&self, values: &[(usize, Value)]) -> Vec<usize> {
        let entity_type = &self.inner.entity_type;
        let mut data = self.inner.data.write();
        let mut changed = Vec::new();
        for (i, v) in values {
            if entity_type.data_properties()[*i].is_part_of_key() {
                continue;
            }
            if data.values[*i] != *v {
                data.values[*i] = v.clone();
                changed.push(*i);
            }
        }
        changed
    }

    /// Writes every given value, keys included, without events or
    /// tracking. Only for entities that are not yet cached.
    pub(crate) fn load_values_raw(&self, values: &[(usize, Value)]) {
        let mut data = self.inner.data.write();
        for (i, v) in values {
            data.values[*i] = v.clone();
        }
    }

    /// Publishes a property change unless the owning manager suppresses
    /// notifications.
    pub(crate) fn publish_property_changed(
        &self,
        name: Option<&str>,
        old_value: PropertyValue,
        new_value: PropertyValue,
    ) {
        let manager = self.manager();
        if manager.as_ref().is_some_and(|m| !m.is_property_changed_enabled()) {
            return;
        }
        if self.inner.property_changed.has_subscribers() {
            let args = PropertyChangedArgs {
                entity: self.clone(),
                property_name: name.map(str::to_string),
                old_value,
                new_value,
            };
            self.inner.property_changed.publish(&args);
        }
        if let Some(manager) = manager {
            manager.notify(EntityAction::PropertyChange, Some(self));
        }
    }

    pub(crate) fn notify_manager(&self, action: EntityAction) {
        if let Some(manager) = self.manager() {
            manager.notify(action, Some(self));
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.instance_id.hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({} {} {})", self.key(), self.state(), self.inner.instance_id)
    }
}
