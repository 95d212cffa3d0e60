//! CLI command implementations.

pub mod convert;
pub mod inspect;

#[cfg(test)]
pub(crate) fn test_bundle() -> entitrack_core::ExportBundle {
    use entitrack_core::{
        DataProperty, DataType, EntityKey, EntityState, EntityType, ExportBundle, ExportedEntity,
        MetadataSnapshot, Value, BUNDLE_FORMAT,
    };
    use std::collections::BTreeMap;

    let order = EntityType::new("Order")
        .data_property(DataProperty::new("orderID", DataType::Int32).key())
        .data_property(DataProperty::new("shipName", DataType::String));
    let row = |id: i64, ship: &str| {
        BTreeMap::from([
            ("orderID".to_string(), Value::Integer(id)),
            ("shipName".to_string(), Value::from(ship)),
        ])
    };
    ExportBundle {
        format: BUNDLE_FORMAT,
        metadata_version: "sample-1".to_string(),
        metadata: Some(MetadataSnapshot {
            name: "sample-1".to_string(),
            complex_types: Vec::new(),
            entity_types: vec![order],
        }),
        entities: vec![
            ExportedEntity {
                type_name: "Order".to_string(),
                state: EntityState::Added,
                values: row(-1, "Draft"),
                original_values: BTreeMap::new(),
            },
            ExportedEntity {
                type_name: "Order".to_string(),
                state: EntityState::Modified,
                values: row(10248, "Vins et alcools"),
                original_values: BTreeMap::from([("shipName".to_string(), Value::Null)]),
            },
        ],
        temp_keys: vec![EntityKey::new("Order", vec![Value::Integer(-1)])],
    }
}
