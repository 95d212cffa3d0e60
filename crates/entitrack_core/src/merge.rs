//! Merge resolution.
//!
//! Decides how incoming data (from a query, an import or an attach of a
//! second instance) is reconciled with an entity already in the cache,
//! and applies that decision.

use crate::entity::{Entity, EntityKey, PropertyValue};
use crate::error::{CoreError, CoreResult};
use crate::events::EntityAction;
use crate::metadata::EntityType;
use crate::state::EntityState;
use entitrack_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Policy for incoming data that targets a cached identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Keep local edits; overwrite only what was not changed locally.
    #[default]
    PreserveChanges,
    /// Replace local values with incoming ones.
    OverwriteChanges,
    /// Leave the cached entity untouched.
    SkipMerge,
    /// Fail on any collision.
    Disallowed,
}

impl MergeStrategy {
    /// Returns the canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            MergeStrategy::PreserveChanges => "PreserveChanges",
            MergeStrategy::OverwriteChanges => "OverwriteChanges",
            MergeStrategy::SkipMerge => "SkipMerge",
            MergeStrategy::Disallowed => "Disallowed",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MergeStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        [
            MergeStrategy::PreserveChanges,
            MergeStrategy::OverwriteChanges,
            MergeStrategy::SkipMerge,
            MergeStrategy::Disallowed,
        ]
        .into_iter()
        .find(|m| m.name().eq_ignore_ascii_case(s))
        .ok_or_else(|| CoreError::invalid_operation(format!("unknown merge strategy: {s}")))
    }
}

/// Outcome of merge resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// Nothing cached: build a new entity.
    Materialize,
    /// Keep the cached entity as is.
    Skip,
    /// Replace every incoming value.
    Overwrite,
    /// Replace only values not changed locally.
    Preserve,
}

/// Resolves what to do with incoming data for `key`, given the state of
/// the cached entity (if any).
pub fn resolve(
    existing: Option<EntityState>,
    strategy: MergeStrategy,
    key: &EntityKey,
) -> CoreResult<MergeAction> {
    let Some(state) = existing else {
        return Ok(MergeAction::Materialize);
    };
    let action = match strategy {
        MergeStrategy::Disallowed => {
            return Err(CoreError::MergeConflict {
                key: key.to_string(),
            })
        }
        MergeStrategy::SkipMerge => MergeAction::Skip,
        MergeStrategy::OverwriteChanges => MergeAction::Overwrite,
        MergeStrategy::PreserveChanges if state.is_unchanged() => MergeAction::Overwrite,
        MergeStrategy::PreserveChanges => MergeAction::Preserve,
    };
    trace!(key = %key, %strategy, ?action, "merge resolved");
    Ok(action)
}

/// Data arriving for a cached identity.
pub(crate) struct Incoming<'a> {
    /// Property values by name. Unknown names are ignored.
    pub values: &'a BTreeMap<String, Value>,
    /// Original values to install on overwrite.
    pub original_values: Option<&'a BTreeMap<String, Value>>,
    /// State the entity should end in on overwrite.
    pub state: EntityState,
}

/// Coerces incoming values against `entity_type`, skipping names the
/// type does not declare.
pub(crate) fn coerce_values(
    entity_type: &EntityType,
    values: &BTreeMap<String, Value>,
) -> CoreResult<Vec<(usize, Value)>> {
    let mut out = Vec::with_capacity(values.len());
    for (name, value) in values {
        let Some(index) = entity_type.data_property_index(name) else {
            trace!(entity_type = entity_type.name(), property = %name, "skipping undeclared property");
            continue;
        };
        let prop = &entity_type.data_properties()[index];
        out.push((index, prop.coerce(value.clone())?));
    }
    Ok(out)
}

/// Originals restricted to mapped, non-key properties of the type.
pub(crate) fn filter_originals(
    entity_type: &EntityType,
    originals: Option<&BTreeMap<String, Value>>,
) -> BTreeMap<String, Value> {
    originals
        .into_iter()
        .flatten()
        .filter(|(name, _)| {
            entity_type
                .data_property_named(name)
                .is_some_and(|p| !p.is_unmapped() && !p.is_part_of_key())
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Applies a resolved merge to `target`. Returns true if anything was
/// written.
///
/// Key values are never merged. Values are written without per-property events; if anything changed a
/// single property-changed notification with no property name is
/// published instead. Navigations are re-synced from the new foreign keys.
pub(crate) fn apply(target: &Entity, action: MergeAction, incoming: &Incoming<'_>) -> CoreResult<bool> {
    let entity_type = Arc::clone(target.entity_type());
    let values = coerce_values(&entity_type, incoming.values)?;
    let changed = match action {
        MergeAction::Materialize | MergeAction::Skip => return Ok(false),
        MergeAction::Overwrite => overwrite(target, &entity_type, &values, incoming)?,
        MergeAction::Preserve => preserve(target, &values)?,
    };
    if changed {
        target.publish_property_changed(
            None,
            PropertyValue::Value(Value::Null),
            PropertyValue::Value(Value::Null),
        );
    }
    debug!(key = %target.key(), ?action, changed, "merged");
    Ok(changed)
}

fn overwrite(
    target: &Entity,
    entity_type: &EntityType,
    values: &[(usize, Value)],
    incoming: &Incoming<'_>,
) -> CoreResult<bool> {
    let was_deleted = target.state().is_deleted();
    let written = target.write_values_raw(values);
    let fk_changed = written
        .iter()
        .any(|i| entity_type.data_properties()[*i].is_foreign_key());
    let target_state = if incoming.state.is_deleted() {
        EntityState::Unchanged
    } else {
        incoming.state
    };
    target.set_original_values(filter_originals(entity_type, incoming.original_values));
    let previous = target.set_state(target_state);
    if let Some(manager) = target.manager() {
        if was_deleted || fk_changed {
            manager.link_related(target);
        }
        if previous != target_state {
            manager.notify(EntityAction::EntityStateChange, Some(target));
        }
    }
    if incoming.state.is_deleted() {
        target.aspect().set_deleted()?;
    }
    Ok(!written.is_empty() || was_deleted != incoming.state.is_deleted())
}

fn preserve(target: &Entity, values: &[(usize, Value)]) -> CoreResult<bool> {
    match target.state() {
        EntityState::Added => return Ok(false),
        EntityState::Deleted => target.aspect().reject_changes()?,
        _ => {}
    }
    let entity_type = Arc::clone(target.entity_type());
    let originals = target.original_values();
    let kept: Vec<(usize, Value)> = values
        .iter()
        .filter(|(i, _)| !originals.contains_key(entity_type.data_properties()[*i].name()))
        .cloned()
        .collect();
    let written = target.write_values_raw(&kept);
    let fk_changed = written
        .iter()
        .any(|i| entity_type.data_properties()[*i].is_foreign_key());
    if fk_changed {
        if let Some(manager) = target.manager() {
            manager.link_related(target);
        }
    }
    Ok(!written.is_empty())
}
