//! Export bundles and import.
//!
//! A bundle carries entity states, current values and the original values
//! needed to reject changes later, plus the temporary keys in use and
//! optionally the metadata itself. Bundles travel as JSON or as canonical
//! CBOR; the CBOR form embeds the metadata as JSON text.

use super::{key_from_values, EntityManager};
use crate::entity::{Entity, EntityKey};
use crate::error::{CoreError, CoreResult};
use crate::events::EntityAction;
use crate::merge::{self, Incoming, MergeAction, MergeStrategy};
use crate::metadata::{DataProperty, EntityType, MetadataSnapshot};
use crate::state::EntityState;
use entitrack_codec::{from_cbor, to_canonical_cbor, CodecError, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Bundle layout version.
pub const BUNDLE_FORMAT: u32 = 1;

/// Rewrites or drops one property value on export. Returning `None` leaves
/// the property out of the bundle.
pub type PropertySerializer = Arc<dyn Fn(&DataProperty, Value) -> Option<Value> + Send + Sync>;

/// Version check run before an import touches the cache.
pub type MetadataVersionFn = Arc<dyn Fn(&BundleHeader<'_>) -> Result<(), String> + Send + Sync>;

/// One exported entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedEntity {
    /// Entity type name.
    pub type_name: String,
    /// State at export time.
    pub state: EntityState,
    /// Current data property values by name.
    pub values: BTreeMap<String, Value>,
    /// Values before local changes, for changed properties only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub original_values: BTreeMap<String, Value>,
}

/// A transportable snapshot of (part of) a manager's cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    /// Layout version.
    pub format: u32,
    /// Name of the exporting metadata store.
    pub metadata_version: String,
    /// Embedded type definitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataSnapshot>,
    /// Exported entities.
    pub entities: Vec<ExportedEntity>,
    /// Keys of exported entities that are temporary.
    #[serde(default)]
    pub temp_keys: Vec<EntityKey>,
}

/// What an import's version check gets to see.
#[derive(Debug, Clone, Copy)]
pub struct BundleHeader<'a> {
    /// Layout version.
    pub format: u32,
    /// Name of the exporting metadata store.
    pub metadata_version: &'a str,
    /// Embedded type definitions, if any.
    pub metadata: Option<&'a MetadataSnapshot>,
}

impl ExportBundle {
    /// Returns the header used for version checks.
    pub fn header(&self) -> BundleHeader<'_> {
        BundleHeader {
            format: self.format,
            metadata_version: &self.metadata_version,
            metadata: self.metadata.as_ref(),
        }
    }

    /// Serializes to pretty-printed JSON.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses JSON produced by [`ExportBundle::to_json`].
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let bundle: Self = serde_json::from_str(json)?;
        bundle.check_format()?;
        Ok(bundle)
    }

    /// Encodes to canonical CBOR.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(to_canonical_cbor(&self.to_value()?)?)
    }

    /// Decodes bytes produced by [`ExportBundle::encode`].
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let bundle = Self::from_value(&from_cbor(bytes)?)?;
        bundle.check_format()?;
        Ok(bundle)
    }

    /// Reads a bundle in either form, telling JSON from CBOR by the first
    /// non-whitespace byte.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    CoreError::Codec(CodecError::decoding_failed(format!("bundle is not UTF-8: {e}")))
                })?;
                Self::from_json(text)
            }
            _ => Self::decode(bytes),
        }
    }

    /// Number of exported entities per type and state.
    pub fn counts(&self) -> BTreeMap<(String, EntityState), usize> {
        let mut counts = BTreeMap::new();
        for e in &self.entities {
            *counts.entry((e.type_name.clone(), e.state)).or_insert(0) += 1;
        }
        counts
    }

    fn check_format(&self) -> CoreResult<()> {
        if self.format > BUNDLE_FORMAT {
            return Err(CoreError::import_rejected(format!(
                "bundle format {} is newer than supported format {BUNDLE_FORMAT}",
                self.format
            )));
        }
        Ok(())
    }

    fn to_value(&self) -> CoreResult<Value> {
        let mut fields = vec![
            ("format", Value::Integer(i64::from(self.format))),
            ("metadataVersion", Value::Text(self.metadata_version.clone())),
            (
                "entities",
                Value::Array(self.entities.iter().map(entity_to_value).collect()),
            ),
            (
                "tempKeys",
                Value::Array(self.temp_keys.iter().map(EntityKey::to_value).collect()),
            ),
        ];
        if let Some(metadata) = &self.metadata {
            fields.push(("metadata", Value::Text(serde_json::to_string(metadata)?)));
        }
        Ok(Value::text_map(fields))
    }

    fn from_value(value: &Value) -> CoreResult<Self> {
        let format = value
            .get("format")
            .and_then(Value::as_integer)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| malformed("missing format"))?;
        let metadata_version = value
            .get("metadataVersion")
            .and_then(Value::as_text)
            .ok_or_else(|| malformed("missing metadataVersion"))?
            .to_string();
        let metadata = match value.get("metadata").and_then(Value::as_text) {
            Some(json) => Some(serde_json::from_str(json)?),
            None => None,
        };
        let entities = value
            .get("entities")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("missing entities"))?
            .iter()
            .map(entity_from_value)
            .collect::<CoreResult<Vec<_>>>()?;
        let temp_keys = value
            .get("tempKeys")
            .and_then(Value::as_array)
            .unwrap_or_default()
            .iter()
            .map(|k| EntityKey::from_value(k).ok_or_else(|| malformed("bad temp key")))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self {
            format,
            metadata_version,
            metadata,
            entities,
            temp_keys,
        })
    }
}

fn malformed(message: &str) -> CoreError {
    CoreError::Codec(CodecError::invalid_structure(format!("export bundle: {message}")))
}

fn values_to_value(values: &BTreeMap<String, Value>) -> Value {
    Value::text_map(values.iter().map(|(k, v)| (k.clone(), v.clone())))
}

fn values_from_value(value: Option<&Value>) -> CoreResult<BTreeMap<String, Value>> {
    let Some(value) = value else {
        return Ok(BTreeMap::new());
    };
    let pairs = value
        .as_map()
        .ok_or_else(|| malformed("property values must be a map"))?;
    pairs
        .iter()
        .map(|(k, v)| {
            k.as_text()
                .map(|k| (k.to_string(), v.clone()))
                .ok_or_else(|| malformed("property names must be text"))
        })
        .collect()
}

fn entity_to_value(entity: &ExportedEntity) -> Value {
    let mut fields = vec![
        ("type", Value::Text(entity.type_name.clone())),
        ("state", Value::Text(entity.state.name().to_string())),
        ("values", values_to_value(&entity.values)),
    ];
    if !entity.original_values.is_empty() {
        fields.push(("originalValues", values_to_value(&entity.original_values)));
    }
    Value::text_map(fields)
}

fn entity_from_value(value: &Value) -> CoreResult<ExportedEntity> {
    let type_name = value
        .get("type")
        .and_then(Value::as_text)
        .ok_or_else(|| malformed("entity without type"))?
        .to_string();
    let state = value
        .get("state")
        .and_then(Value::as_text)
        .ok_or_else(|| malformed("entity without state"))?
        .parse()?;
    Ok(ExportedEntity {
        type_name,
        state,
        values: values_from_value(value.get("values"))?,
        original_values: values_from_value(value.get("originalValues"))?,
    })
}

/// Options for [`EntityManager::export_entities`].
#[derive(Clone)]
pub struct ExportOptions {
    /// Embed the metadata snapshot in the bundle.
    pub include_metadata: bool,
    /// Per-property value rewriter.
    pub serializer: Option<PropertySerializer>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
            serializer: None,
        }
    }
}

impl ExportOptions {
    /// Creates default options (metadata included, no serializer).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to embed metadata.
    #[must_use]
    pub fn include_metadata(mut self, value: bool) -> Self {
        self.include_metadata = value;
        self
    }

    /// Sets the property serializer.
    #[must_use]
    pub fn serializer<F>(mut self, serializer: F) -> Self
    where
        F: Fn(&DataProperty, Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.serializer = Some(Arc::new(serializer));
        self
    }
}

impl fmt::Debug for ExportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportOptions")
            .field("include_metadata", &self.include_metadata)
            .field("serializer", &self.serializer.is_some())
            .finish()
    }
}

/// Options for [`EntityManager::import_entities`].
#[derive(Clone, Default)]
pub struct ImportOptions {
    /// Strategy for identities already cached; the manager's configured
    /// import strategy when `None`.
    pub merge_strategy: Option<MergeStrategy>,
    /// Check run against the bundle header before anything is imported.
    pub metadata_version_fn: Option<MetadataVersionFn>,
}

impl ImportOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the merge strategy.
    #[must_use]
    pub fn merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }

    /// Sets the version check.
    #[must_use]
    pub fn metadata_version_fn<F>(mut self, check: F) -> Self
    where
        F: Fn(&BundleHeader<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.metadata_version_fn = Some(Arc::new(check));
        self
    }
}

impl fmt::Debug for ImportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOptions")
            .field("merge_strategy", &self.merge_strategy)
            .field("metadata_version_fn", &self.metadata_version_fn.is_some())
            .finish()
    }
}

/// Outcome of an import.
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    /// Imported or merged entities, in bundle order.
    pub entities: Vec<Entity>,
    /// Temporary keys from the bundle and the fresh keys that replaced
    /// them.
    pub temp_key_map: HashMap<EntityKey, EntityKey>,
}

/// A bundle row resolved against local metadata.
struct Row<'a> {
    entity_type: Arc<EntityType>,
    source: &'a ExportedEntity,
    values: BTreeMap<String, Value>,
}

impl EntityManager {
    /// Exports `entities` (or the whole cache) into a bundle.
    ///
    /// Every given entity must be attached to this manager.
    pub fn export_entities(
        &self,
        entities: Option<&[Entity]>,
        options: &ExportOptions,
    ) -> CoreResult<ExportBundle> {
        let selected = match entities {
            Some(list) => {
                for entity in list {
                    if !entity.manager().is_some_and(|m| m.same(self)) {
                        return Err(CoreError::invalid_operation(format!(
                            "cannot export {}: it is not attached to this EntityManager",
                            entity.key()
                        )));
                    }
                }
                list.to_vec()
            }
            None => self.get_entities(None, None)?,
        };
        let mut exported = Vec::with_capacity(selected.len());
        let mut temp_keys = Vec::new();
        for entity in &selected {
            let entity_type = Arc::clone(entity.entity_type());
            let mut values = BTreeMap::new();
            for (index, prop) in entity_type.data_properties().iter().enumerate() {
                let value = entity.value_at(index);
                let value = match &options.serializer {
                    Some(serializer) => match serializer(prop, value) {
                        Some(v) => v,
                        None => continue,
                    },
                    None => value,
                };
                values.insert(prop.name().to_string(), value);
            }
            let key = entity.key();
            if self.is_temp_key(&key) {
                temp_keys.push(key);
            }
            exported.push(ExportedEntity {
                type_name: entity.type_name().to_string(),
                state: entity.state(),
                values,
                original_values: entity.original_values(),
            });
        }
        let store = self.metadata_store();
        debug!(count = exported.len(), temp_keys = temp_keys.len(), "entities exported");
        Ok(ExportBundle {
            format: BUNDLE_FORMAT,
            metadata_version: store.name(),
            metadata: options.include_metadata.then(|| store.snapshot()),
            entities: exported,
            temp_keys,
        })
    }

    /// Imports a bundle, merging each entity into the cache.
    ///
    /// The version check runs first and every entity type is resolved
    /// before anything is cached, so a rejected import changes nothing.
    /// Temporary keys are replaced with fresh ones from this manager,
    /// together with the foreign keys that refer to them.
    pub fn import_entities(
        &self,
        bundle: &ExportBundle,
        options: &ImportOptions,
    ) -> CoreResult<ImportResult> {
        if let Some(check) = &options.metadata_version_fn {
            check(&bundle.header()).map_err(CoreError::import_rejected)?;
        }
        let store = self.metadata_store();
        let mut rows = bundle
            .entities
            .iter()
            .map(|source| {
                Ok(Row {
                    entity_type: store.entity_type(&source.type_name)?,
                    source,
                    values: source.values.clone(),
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let strategy = options
            .merge_strategy
            .unwrap_or(self.config().import_merge_strategy);
        let temp_key_map = self.remap_temp_keys(bundle, &mut rows)?;
        if strategy == MergeStrategy::Disallowed {
            for row in &rows {
                let key = key_from_values(&row.entity_type, &row.values)?;
                if self.find_entity_by_key(&key).is_some() {
                    return Err(CoreError::MergeConflict {
                        key: key.to_string(),
                    });
                }
            }
        }

        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            entities.push(self.import_row(row, strategy)?);
        }
        for new_key in temp_key_map.values() {
            self.register_temp_key(new_key.clone());
        }
        debug!(
            count = entities.len(),
            remapped = temp_key_map.len(),
            %strategy,
            "entities imported"
        );
        Ok(ImportResult {
            entities,
            temp_key_map,
        })
    }

    fn import_row(&self, row: &Row<'_>, strategy: MergeStrategy) -> CoreResult<Entity> {
        let key = key_from_values(&row.entity_type, &row.values)?;
        let existing = self.find_entity_by_key(&key);
        let action = merge::resolve(existing.as_ref().map(Entity::state), strategy, &key)?;
        match existing {
            None => self.materialize(
                &row.entity_type,
                &row.values,
                Some(&row.source.original_values),
                row.source.state,
                EntityAction::AttachOnImport,
            ),
            Some(entity) if action == MergeAction::Skip => Ok(entity),
            Some(entity) => {
                let incoming = Incoming {
                    values: &row.values,
                    original_values: Some(&row.source.original_values),
                    state: row.source.state,
                };
                merge::apply(&entity, action, &incoming)?;
                self.notify(EntityAction::MergeOnImport, Some(&entity));
                Ok(entity)
            }
        }
    }

    /// Mints a fresh temp key for every temp-keyed row and rewrites keys and
    /// foreign keys in `rows` accordingly.
    fn remap_temp_keys(
        &self,
        bundle: &ExportBundle,
        rows: &mut [Row<'_>],
    ) -> CoreResult<HashMap<EntityKey, EntityKey>> {
        let mut map = HashMap::new();
        for old in &bundle.temp_keys {
            let entity_type = self.metadata_store().entity_type(old.type_name())?;
            let (_, value) = self.mint_temp_key(&entity_type)?;
            map.insert(old.clone(), EntityKey::new(old.type_name(), vec![value]));
        }
        if map.is_empty() {
            return Ok(map);
        }
        for row in rows.iter_mut() {
            let entity_type = Arc::clone(&row.entity_type);
            let own_names: Vec<String> = entity_type
                .key_properties()
                .map(|p| p.name().to_string())
                .collect();
            rewrite_key(&mut row.values, entity_type.name(), &own_names, &map);
            for nav in entity_type.navigation_properties() {
                if nav.is_scalar() && !nav.foreign_key_names().is_empty() {
                    rewrite_key(&mut row.values, nav.entity_type_name(), nav.foreign_key_names(), &map);
                }
            }
        }
        Ok(map)
    }
}

/// Replaces the values of `names` with the mapped key when they currently
/// spell a key of `type_name` found in `map`.
fn rewrite_key(
    values: &mut BTreeMap<String, Value>,
    type_name: &str,
    names: &[String],
    map: &HashMap<EntityKey, EntityKey>,
) {
    let Some(current) = names
        .iter()
        .map(|n| values.get(n).cloned())
        .collect::<Option<Vec<_>>>()
    else {
        return;
    };
    let Some(replacement) = map.get(&EntityKey::new(type_name, current)) else {
        return;
    };
    for (name, value) in names.iter().zip(replacement.values()) {
        values.insert(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::northwind;
    use chrono::{TimeZone, Utc};

    fn populated() -> EntityManager {
        let em = EntityManager::with_metadata(northwind());
        let customer = em
            .create_entity("Customer", &[("companyName", "Acme".into())])
            .unwrap();
        let order = em
            .create_entity(
                "Order",
                &[
                    ("shipName", "Barnum".into()),
                    ("orderDate", Utc.with_ymd_and_hms(2024, 2, 29, 13, 5, 7).unwrap().into()),
                ],
            )
            .unwrap();
        order.set_property("customer", &customer).unwrap();
        em
    }

    #[test]
    fn json_and_cbor_carry_the_same_bundle() {
        let em = populated();
        let bundle = em.export_entities(None, &ExportOptions::new()).unwrap();
        assert_eq!(bundle.entities.len(), 2);
        assert_eq!(bundle.temp_keys.len(), 2);
        assert!(bundle.metadata.is_some());

        let from_json = ExportBundle::from_bytes(bundle.to_json().unwrap().as_bytes()).unwrap();
        let from_cbor = ExportBundle::from_bytes(&bundle.encode().unwrap()).unwrap();
        assert_eq!(from_json.entities, bundle.entities);
        assert_eq!(from_cbor.entities, bundle.entities);
        assert_eq!(from_cbor.temp_keys, bundle.temp_keys);
        assert_eq!(from_cbor.metadata_version, "unit");
    }

    #[test]
    fn import_remaps_temp_keys_and_foreign_keys() {
        let source = populated();
        let bundle = source.export_entities(None, &ExportOptions::new()).unwrap();
        let target = EntityManager::with_metadata(Arc::clone(source.metadata_store()));
        let existing = target.create_entity("Order", &[]).unwrap();

        let result = target.import_entities(&bundle, &ImportOptions::new()).unwrap();
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.temp_key_map.len(), 2);
        let order = result
            .entities
            .iter()
            .find(|e| e.type_name() == "Order")
            .unwrap();
        assert_ne!(order.key(), existing.key());
        assert!(order.aspect().has_temp_key());
        let customer = order.get_entity("customer").unwrap().unwrap();
        assert_eq!(order.get_value("customerID").unwrap(), customer.get_value("customerID").unwrap());
        assert_eq!(
            order.get_value("orderDate").unwrap(),
            Value::DateTime(Utc.with_ymd_and_hms(2024, 2, 29, 13, 5, 7).unwrap())
        );
        assert!(order.aspect().entity_state().is_added());
    }

    #[test]
    fn version_check_rejects_before_merging() {
        let source = populated();
        let bundle = source.export_entities(None, &ExportOptions::new()).unwrap();
        let target = EntityManager::with_metadata(Arc::clone(source.metadata_store()));
        let options = ImportOptions::new().metadata_version_fn(|header| {
            if header.metadata_version == "v2" {
                Ok(())
            } else {
                Err(format!("expected v2, got {}", header.metadata_version))
            }
        });
        let err = target.import_entities(&bundle, &options).unwrap_err();
        assert!(matches!(err, CoreError::ImportRejected { .. }));
        assert!(target.is_empty());
    }

    #[test]
    fn serializer_can_drop_values() {
        let em = populated();
        let options = ExportOptions::new()
            .include_metadata(false)
            .serializer(|prop, value| (prop.name() != "shipName").then_some(value));
        let bundle = em.export_entities(None, &options).unwrap();
        assert!(bundle.metadata.is_none());
        assert!(bundle.entities.iter().all(|e| !e.values.contains_key("shipName")));
    }

    #[test]
    fn unknown_types_reject_the_whole_import() {
        let em = populated();
        let mut bundle = em.export_entities(None, &ExportOptions::new()).unwrap();
        bundle.entities[1].type_name = "OrderDetXXX".into();
        let target = EntityManager::with_metadata(Arc::clone(em.metadata_store()));
        let err = target.import_entities(&bundle, &ImportOptions::new()).unwrap_err();
        assert!(err.to_string().contains("OrderDetXXX"));
        assert!(target.is_empty());
    }
}
