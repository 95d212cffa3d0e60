//! Relationship maintenance.
//!
//! Both ends of an association are kept consistent: assigning a scalar
//! navigation updates the parent's relation array and the child's foreign
//! keys, changing a foreign key re-points the navigation, and changing a
//! parent key rewrites the foreign keys of its dependents. Entities linked
//! across the attached/detached boundary are pulled into the attached
//! side's manager as Added.

use super::{Entity, EntityInner, EntityKey, PropertyValue, WriteMode};
use crate::error::{CoreError, CoreResult};
use crate::events::{ArrayChangedArgs, EventChannel};
use crate::manager::EntityManager;
use crate::metadata::{EntityType, NavigationProperty};
use crate::state::EntityState;
use entitrack_codec::Value;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

struct RelationInner {
    parent: Weak<EntityInner>,
    nav_index: usize,
    items: RwLock<Vec<Entity>>,
    array_changed: EventChannel<ArrayChangedArgs>,
}

/// The live collection behind a collection navigation property.
///
/// Adding a child sets the child's inverse navigation (and foreign key) to
/// the owning entity; removing it clears them. Membership always mirrors
/// the children's scalar navigations.
#[derive(Clone)]
pub struct RelationArray {
    inner: Arc<RelationInner>,
}

impl RelationArray {
    pub(crate) fn new(parent: Weak<EntityInner>, nav_index: usize) -> Self {
        Self {
            inner: Arc::new(RelationInner {
                parent,
                nav_index,
                items: RwLock::new(Vec::new()),
                array_changed: EventChannel::new(),
            }),
        }
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.inner.items.read().len()
    }

    /// Returns true if there are no members.
    pub fn is_empty(&self) -> bool {
        self.inner.items.read().is_empty()
    }

    /// Returns the member at `index`.
    pub fn get(&self, index: usize) -> Option<Entity> {
        self.inner.items.read().get(index).cloned()
    }

    /// Copies the members out, in insertion order.
    pub fn to_vec(&self) -> Vec<Entity> {
        self.inner.items.read().clone()
    }

    /// Returns true if `entity` is a member.
    pub fn contains(&self, entity: &Entity) -> bool {
        self.inner.items.read().iter().any(|e| e == entity)
    }

    /// Returns the entity owning this array.
    pub fn parent_entity(&self) -> Option<Entity> {
        self.inner.parent.upgrade().map(Entity::from_inner)
    }

    /// Returns the navigation property this array backs.
    pub fn navigation_property(&self) -> Option<NavigationProperty> {
        let parent = self.parent_entity()?;
        parent
            .entity_type()
            .navigation_properties()
            .get(self.inner.nav_index)
            .cloned()
    }

    /// Channel notified when members are added or removed.
    pub fn array_changed(&self) -> &EventChannel<ArrayChangedArgs> {
        &self.inner.array_changed
    }

    /// Adds `child`, pointing its inverse navigation at the owner.
    ///
    /// Adding a member that is already present does nothing. An Unchanged
    /// child pushed into an Added parent's collection becomes Modified, not Added.
    pub fn push(&self, child: &Entity) -> CoreResult<()> {
        let (parent, nav) = self.owner()?;
        if child.type_name() != nav.entity_type_name() {
            return Err(CoreError::invalid_value(
                nav.name(),
                format!("expected {} but got {}", nav.entity_type_name(), child.type_name()),
            ));
        }
        if self.contains(child) {
            return Ok(());
        }
        match inverse_index(&nav, child) {
            Some(inv_index) => set_reference(child, inv_index, Some(parent), WriteMode::USER),
            None => {
                let fk_values = inverse_fk_values(&nav, child, Some(&parent));
                let plan = AttachPlan::prepare(child, &parent, &fk_values, WriteMode::USER)?;
                if self.add_raw(child) {
                    self.publish_change(vec![child.clone()], Vec::new());
                }
                for (index, value) in fk_values {
                    child.write_data(index, value, WriteMode::USER)?;
                }
                plan.execute(child)
            }
        }
    }

    /// Adds every entity in `children`.
    pub fn extend(&self, children: &[Entity]) -> CoreResult<()> {
        children.iter().try_for_each(|c| self.push(c))
    }

    /// Removes `child`, clearing its inverse navigation and foreign key.
    /// Returns false if it was not a member.
    pub fn remove(&self, child: &Entity) -> CoreResult<bool> {
        if !self.contains(child) {
            return Ok(false);
        }
        let (parent, nav) = self.owner()?;
        match inverse_index(&nav, child) {
            Some(inv_index) if child.reference(inv_index).as_ref() == Some(&parent) => {
                set_reference(child, inv_index, None, WriteMode::USER)?;
            }
            _ => {
                if self.remove_raw(child) {
                    self.publish_change(Vec::new(), vec![child.clone()]);
                }
                for (index, value) in inverse_fk_values(&nav, child, None) {
                    child.write_data(index, value, WriteMode::USER)?;
                }
            }
        }
        Ok(true)
    }

    /// Removes the member at `index`.
    pub fn remove_at(&self, index: usize) -> CoreResult<Option<Entity>> {
        let Some(child) = self.get(index) else {
            return Ok(None);
        };
        self.remove(&child)?;
        Ok(Some(child))
    }

    /// Removes every member.
    pub fn clear(&self) -> CoreResult<()> {
        for child in self.to_vec() {
            self.remove(&child)?;
        }
        Ok(())
    }

    fn owner(&self) -> CoreResult<(Entity, NavigationProperty)> {
        let parent = self
            .parent_entity()
            .ok_or_else(|| CoreError::invalid_operation("the entity owning this collection no longer exists"))?;
        let nav = parent.entity_type().navigation_properties()[self.inner.nav_index].clone();
        Ok((parent, nav))
    }

    pub(crate) fn add_raw(&self, entity: &Entity) -> bool {
        let mut items = self.inner.items.write();
        if items.iter().any(|e| e == entity) {
            return false;
        }
        items.push(entity.clone());
        true
    }

    pub(crate) fn remove_raw(&self, entity: &Entity) -> bool {
        let mut items = self.inner.items.write();
        let before = items.len();
        items.retain(|e| e != entity);
        items.len() != before
    }

    pub(crate) fn take_all(&self) -> Vec<Entity> {
        std::mem::take(&mut *self.inner.items.write())
    }

    pub(crate) fn publish_change(&self, added: Vec<Entity>, removed: Vec<Entity>) {
        if !self.inner.array_changed.has_subscribers() {
            return;
        }
        let args = ArrayChangedArgs {
            relation: self.clone(),
            added,
            removed,
        };
        self.inner.array_changed.publish(&args);
    }
}

impl PartialEq for RelationArray {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RelationArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.navigation_property().map(|n| n.name().to_string());
        f.debug_struct("RelationArray")
            .field("navigation", &name)
            .field("len", &self.len())
            .finish()
    }
}

fn inverse_index(nav: &NavigationProperty, child: &Entity) -> Option<usize> {
    nav.inverse_name()
        .and_then(|inv| child.entity_type().navigation_index(inv))
}

/// Foreign key writes that point scalar navigation `nav` of `entity_type`
/// at `target`, or reset it when `target` is `None`. Key parts are never
/// reset.
fn fk_values(entity_type: &EntityType, nav: &NavigationProperty, target: Option<&Entity>) -> Vec<(usize, Value)> {
    fk_writes(entity_type, nav.foreign_key_names(), target)
}

/// Same as [`fk_values`] for the child-side keys named by a collection.
fn inverse_fk_values(nav: &NavigationProperty, child: &Entity, parent: Option<&Entity>) -> Vec<(usize, Value)> {
    fk_writes(child.entity_type(), nav.inverse_foreign_key_names(), parent)
}

fn fk_writes(entity_type: &EntityType, names: &[String], target: Option<&Entity>) -> Vec<(usize, Value)> {
    let target_key = target.map(Entity::key);
    names
        .iter()
        .enumerate()
        .filter_map(|(pos, fk)| {
            let index = entity_type.data_property_index(fk)?;
            let prop = &entity_type.data_properties()[index];
            match &target_key {
                Some(key) => key.values().get(pos).map(|v| (index, v.clone())),
                None if prop.is_part_of_key() => None,
                None if prop.is_nullable() => Some((index, Value::Null)),
                None => Some((index, prop.default_value())),
            }
        })
        .collect()
}

/// What to attach once a link across managers has been written.
enum AttachPlan {
    Nothing,
    Target(EntityManager, Entity),
    Child(EntityManager),
}

impl AttachPlan {
    /// Checks that linking `child` to `target` (with the given foreign
    /// key writes) can complete, before anything is mutated.
    fn prepare(child: &Entity, target: &Entity, fk_values: &[(usize, Value)], mode: WriteMode) -> CoreResult<Self> {
        if !Arc::ptr_eq(child.metadata_store(), target.metadata_store()) {
            return Err(CoreError::ForeignMetadataStore {
                type_name: target.type_name().to_string(),
            });
        }
        let prospective = child.key_with_all(fk_values);
        match (child.manager(), target.manager()) {
            (Some(a), Some(b)) => {
                if !a.same(&b) {
                    return Err(CoreError::CrossManagerAttach {
                        key: target.key().to_string(),
                    });
                }
                if prospective != child.key() {
                    if mode.track && child.state().is_persisted() {
                        return Err(CoreError::invalid_operation(format!(
                            "cannot re-parent {} entity {}: its key includes the foreign key",
                            child.state(),
                            child.key()
                        )));
                    }
                    a.ensure_key_available(&prospective, child)?;
                }
                Ok(AttachPlan::Nothing)
            }
            (Some(a), None) => {
                a.check_attachable(target, &target.key())?;
                Ok(AttachPlan::Target(a, target.clone()))
            }
            (None, Some(b)) => {
                b.check_attachable(child, &prospective)?;
                Ok(AttachPlan::Child(b))
            }
            (None, None) => Ok(AttachPlan::Nothing),
        }
    }

    fn execute(self, child: &Entity) -> CoreResult<()> {
        match self {
            AttachPlan::Nothing => Ok(()),
            AttachPlan::Target(manager, target) => {
                if target.state().is_detached() {
                    manager.attach_entity(&target, EntityState::Added)?;
                }
                Ok(())
            }
            AttachPlan::Child(manager) => {
                if child.state().is_detached() {
                    manager.attach_entity(child, EntityState::Added)?;
                }
                Ok(())
            }
        }
    }
}

/// Points scalar navigation `nav_index` of `child` at `target`.
///
/// Order of effects: the navigation is written and announced, the inverse
/// side is updated, foreign keys are synced (when `mode.sync_fk`), and
/// finally a detached side is attached to the other side's manager.
pub(crate) fn set_reference(
    child: &Entity,
    nav_index: usize,
    target: Option<Entity>,
    mode: WriteMode,
) -> CoreResult<()> {
    let entity_type = Arc::clone(child.entity_type());
    let nav = &entity_type.navigation_properties()[nav_index];
    if let Some(t) = &target {
        if t.type_name() != nav.entity_type_name() {
            return Err(CoreError::invalid_value(
                nav.name(),
                format!("expected {} but got {}", nav.entity_type_name(), t.type_name()),
            ));
        }
    }
    let old = child.reference(nav_index);
    if old == target || child.is_in_process(nav.name()) {
        return Ok(());
    }
    let fk_values = if mode.sync_fk {
        fk_values(&entity_type, nav, target.as_ref())
    } else {
        Vec::new()
    };
    let plan = match &target {
        Some(t) => AttachPlan::prepare(child, t, &fk_values, mode)?,
        None => AttachPlan::Nothing,
    };
    let Some(_guard) = child.enter(nav.name()) else {
        return Ok(());
    };

    child.set_reference_raw(nav_index, target.clone());
    child.publish_property_changed(
        Some(nav.name()),
        PropertyValue::Entity(old.clone()),
        PropertyValue::Entity(target.clone()),
    );
    if let Some(inverse) = nav.inverse_name() {
        if let Some(old_parent) = &old {
            unlink_inverse(old_parent, inverse, child, mode)?;
        }
        if let Some(new_parent) = &target {
            link_inverse(new_parent, inverse, child, mode)?;
        }
    }
    for (index, value) in fk_values {
        child.write_data(index, value, mode)?;
    }
    plan.execute(child)
}

fn link_inverse(parent: &Entity, inverse: &str, child: &Entity, mode: WriteMode) -> CoreResult<()> {
    let Some(inv_index) = parent.entity_type().navigation_index(inverse) else {
        return Ok(());
    };
    match parent.collection_at(inv_index) {
        Some(array) => {
            if array.add_raw(child) {
                array.publish_change(vec![child.clone()], Vec::new());
            }
            Ok(())
        }
        None => set_reference(parent, inv_index, Some(child.clone()), mode),
    }
}

fn unlink_inverse(parent: &Entity, inverse: &str, child: &Entity, mode: WriteMode) -> CoreResult<()> {
    let Some(inv_index) = parent.entity_type().navigation_index(inverse) else {
        return Ok(());
    };
    match parent.collection_at(inv_index) {
        Some(array) => {
            if array.remove_raw(child) {
                array.publish_change(Vec::new(), vec![child.clone()]);
            }
            Ok(())
        }
        None if parent.reference(inv_index).as_ref() == Some(child) => {
            set_reference(parent, inv_index, None, mode)
        }
        None => Ok(()),
    }
}

/// Re-points scalar navigation `nav_index` after its foreign key changed.
///
/// Links to the cached parent when one exists (and is not Deleted);
/// otherwise clears the navigation and remembers the child so the parent
/// can adopt it when it arrives.
pub(crate) fn sync_reference_from_fk(entity: &Entity, nav_index: usize, mode: WriteMode) -> CoreResult<()> {
    let entity_type = Arc::clone(entity.entity_type());
    let nav = &entity_type.navigation_properties()[nav_index];
    if entity.is_in_process(nav.name()) {
        return Ok(());
    }
    let fk = entity.foreign_key(nav_index);
    let current = entity.reference(nav_index);
    match (&current, &fk) {
        (Some(c), Some(k)) if c.key() == *k => return Ok(()),
        (None, None) => return Ok(()),
        _ => {}
    }
    let manager = entity.manager();
    let parent = match (&manager, &fk) {
        (Some(m), Some(k)) => m.find_linkable(k),
        _ => None,
    };
    let mode = mode.without_fk_sync();
    match parent {
        Some(p) => set_reference(entity, nav_index, Some(p), mode),
        None => {
            if current.is_some() {
                set_reference(entity, nav_index, None, mode)?;
            }
            if let (Some(m), Some(k)) = (manager, fk) {
                m.park_child(k, nav.name(), entity);
            }
            Ok(())
        }
    }
}

/// Points scalar navigation `nav_index` of `child` at `parent` and adds
/// `child` to the inverse side, without events or state changes. Used for
/// fix-ups when entities enter the cache.
pub(crate) fn link_silently(child: &Entity, nav_index: usize, parent: &Entity) {
    let entity_type = Arc::clone(child.entity_type());
    let nav = &entity_type.navigation_properties()[nav_index];
    let old = child.set_reference_raw(nav_index, Some(parent.clone()));
    let Some(inverse) = nav.inverse_name() else {
        return;
    };
    if let Some(old) = old.filter(|o| o != parent) {
        drop_from_inverse(&old, inverse, child);
    }
    let Some(inv_index) = parent.entity_type().navigation_index(inverse) else {
        return;
    };
    match parent.collection_at(inv_index) {
        Some(array) => {
            array.add_raw(child);
        }
        None => {
            parent.set_reference_raw(inv_index, Some(child.clone()));
        }
    }
    trace!(child = %child.key(), parent = %parent.key(), nav = nav.name(), "linked");
}

/// Clears scalar navigation `nav_index` of `child` and its inverse side,
/// without events or state changes.
pub(crate) fn unlink_silently(child: &Entity, nav_index: usize) {
    let entity_type = Arc::clone(child.entity_type());
    let nav = &entity_type.navigation_properties()[nav_index];
    let Some(old) = child.set_reference_raw(nav_index, None) else {
        return;
    };
    if let Some(inverse) = nav.inverse_name() {
        drop_from_inverse(&old, inverse, child);
    }
}

fn drop_from_inverse(parent: &Entity, inverse: &str, child: &Entity) {
    let Some(inv_index) = parent.entity_type().navigation_index(inverse) else {
        return;
    };
    match parent.collection_at(inv_index) {
        Some(array) => {
            array.remove_raw(child);
        }
        None => {
            if parent.reference(inv_index).as_ref() == Some(child) {
                parent.set_reference_raw(inv_index, None);
            }
        }
    }
}

/// Propagates a key change: re-indexes the entity in its manager and
/// rewrites the foreign keys of its dependents.
pub(crate) fn on_key_changed(entity: &Entity, old_key: &EntityKey) -> CoreResult<()> {
    if let Some(manager) = entity.manager() {
        manager.rekey(entity, old_key);
    }
    let new_key = entity.key();
    let entity_type = Arc::clone(entity.entity_type());
    for (index, nav) in entity_type.navigation_properties().iter().enumerate() {
        if nav.inverse_foreign_key_names().is_empty() {
            continue;
        }
        let dependents: Vec<Entity> = match entity.collection_at(index) {
            Some(array) => array.to_vec(),
            None => entity.reference(index).into_iter().collect(),
        };
        for dependent in dependents {
            for (fk_index, value) in fk_writes(dependent.entity_type(), nav.inverse_foreign_key_names(), Some(entity)) {
                dependent.write_data(fk_index, value, WriteMode::USER)?;
            }
        }
    }
    trace!(from = %old_key, to = %new_key, "entity key changed");
    Ok(())
}

/// Why relationships are being severed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeverMode {
    /// The entity is being deleted; unchanged dependents become Modified.
    Delete,
    /// The entity is leaving its manager.
    Detach,
}

/// Clears every navigation of `entity` and removes it from its parents'
/// relation arrays. Foreign keys are left untouched, so dependents that
/// stay in the manager are remembered and relink if the entity returns.
pub(crate) fn sever_relations(entity: &Entity, mode: SeverMode) {
    let entity_type = Arc::clone(entity.entity_type());
    let entity_key = entity.key();
    let manager = entity.manager();
    for (index, nav) in entity_type.navigation_properties().iter().enumerate() {
        if let Some(array) = entity.collection_at(index) {
            let children = array.take_all();
            if children.is_empty() {
                continue;
            }
            array.publish_change(Vec::new(), children.clone());
            for child in &children {
                release_dependent(entity, nav, child, mode, &entity_key, manager.as_ref());
            }
        } else if let Some(other) = entity.reference(index) {
            if !nav.inverse_foreign_key_names().is_empty() {
                entity.set_reference_raw(index, None);
                entity.publish_property_changed(
                    Some(nav.name()),
                    PropertyValue::Entity(Some(other.clone())),
                    PropertyValue::Entity(None),
                );
                release_dependent(entity, nav, &other, mode, &entity_key, manager.as_ref());
                continue;
            }
            entity.set_reference_raw(index, None);
            entity.publish_property_changed(
                Some(nav.name()),
                PropertyValue::Entity(Some(other.clone())),
                PropertyValue::Entity(None),
            );
            if let Some(inverse) = nav.inverse_name() {
                remove_from_inverse(&other, inverse, entity);
            }
        }
    }
}

fn release_dependent(
    parent: &Entity,
    nav: &NavigationProperty,
    child: &Entity,
    mode: SeverMode,
    parent_key: &EntityKey,
    manager: Option<&EntityManager>,
) {
    let Some(inverse) = nav.inverse_name() else {
        return;
    };
    let Some(inv_index) = child.entity_type().navigation_index(inverse) else {
        return;
    };
    if child.reference(inv_index).as_ref() != Some(parent) {
        return;
    }
    child.set_reference_raw(inv_index, None);
    child.publish_property_changed(
        Some(inverse),
        PropertyValue::Entity(Some(parent.clone())),
        PropertyValue::Entity(None),
    );
    if mode == SeverMode::Delete {
        child.mark_modified();
    }
    if let Some(manager) = manager {
        if child.manager().is_some_and(|m| m.same(manager)) {
            manager.park_child(parent_key.clone(), inverse, child);
        }
    }
}

fn remove_from_inverse(other: &Entity, inverse: &str, entity: &Entity) {
    let Some(inv_index) = other.entity_type().navigation_index(inverse) else {
        return;
    };
    match other.collection_at(inv_index) {
        Some(array) => {
            if array.remove_raw(entity) {
                array.publish_change(Vec::new(), vec![entity.clone()]);
            }
        }
        None => {
            if other.reference(inv_index).as_ref() == Some(entity) {
                other.set_reference_raw(inv_index, None);
                other.publish_property_changed(
                    Some(inverse),
                    PropertyValue::Entity(Some(entity.clone())),
                    PropertyValue::Entity(None),
                );
            }
        }
    }
}
