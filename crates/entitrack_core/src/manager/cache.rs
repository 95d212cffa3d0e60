//! Identity map and unattached-children index.

use crate::entity::{Entity, EntityKey};
use std::collections::HashMap;

/// One instance per identity, plus children waiting for a parent that is
/// not cached yet.
#[derive(Default)]
pub(crate) struct EntityCache {
    entities: HashMap<EntityKey, Entity>,
    /// Parent key to (child navigation name, child).
    unattached: HashMap<EntityKey, Vec<(String, Entity)>>,
}

impl EntityCache {
    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    pub fn insert(&mut self, key: EntityKey, entity: Entity) -> Option<Entity> {
        self.entities.insert(key, entity)
    }

    /// Removes `key` only if it maps to `entity`.
    pub fn remove(&mut self, key: &EntityKey, entity: &Entity) -> bool {
        if self.entities.get(key) == Some(entity) {
            self.entities.remove(key);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// All cached entities in attach order.
    pub fn entities(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.entities.values().cloned().collect();
        all.sort_by_key(Entity::instance_id);
        all
    }

    /// Remembers that `child` points at `parent_key` through `nav_name`.
    pub fn park(&mut self, parent_key: EntityKey, nav_name: &str, child: &Entity) {
        let waiting = self.unattached.entry(parent_key).or_default();
        if !waiting.iter().any(|(n, e)| n == nav_name && e == child) {
            waiting.push((nav_name.to_string(), child.clone()));
        }
    }

    pub fn take_parked(&mut self, parent_key: &EntityKey) -> Vec<(String, Entity)> {
        self.unattached.remove(parent_key).unwrap_or_default()
    }

    /// Drops every parked entry for `child`.
    pub fn unpark_entity(&mut self, child: &Entity) {
        self.unattached.retain(|_, waiting| {
            waiting.retain(|(_, e)| e != child);
            !waiting.is_empty()
        });
    }

    pub fn parked_count(&self) -> usize {
        self.unattached.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) -> Vec<Entity> {
        self.unattached.clear();
        let mut all: Vec<Entity> = self.entities.drain().map(|(_, e)| e).collect();
        all.sort_by_key(Entity::instance_id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::northwind;

    #[test]
    fn remove_checks_identity() {
        let store = northwind();
        let a = store.create_entity("Product", &[("productID", 1.into())]).unwrap();
        let b = store.create_entity("Product", &[("productID", 1.into())]).unwrap();
        let mut cache = EntityCache::default();
        cache.insert(a.key(), a.clone());
        assert!(!cache.remove(&b.key(), &b));
        assert!(cache.contains(&a.key()));
        assert!(cache.remove(&a.key(), &a));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn parking() {
        let store = northwind();
        let order = store.create_entity("Order", &[]).unwrap();
        let parent = EntityKey::new("Customer", vec![uuid::Uuid::new_v4().into()]);
        let mut cache = EntityCache::default();
        cache.park(parent.clone(), "customer", &order);
        cache.park(parent.clone(), "customer", &order);
        assert_eq!(cache.parked_count(), 1);
        cache.unpark_entity(&order);
        assert_eq!(cache.parked_count(), 0);

        cache.park(parent.clone(), "customer", &order);
        let taken = cache.take_parked(&parent);
        assert_eq!(taken, vec![("customer".to_string(), order)]);
        assert!(cache.take_parked(&parent).is_empty());
    }
}
