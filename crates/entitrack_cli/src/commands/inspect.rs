//! Inspect command implementation.

use entitrack_core::{EntityState, ExportBundle, ExportedEntity, MetadataSnapshot};
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// Bundle inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Bundle path.
    pub path: String,
    /// Encoding of the file (json or cbor).
    pub encoding: &'static str,
    /// File size in bytes.
    pub size: u64,
    /// Bundle layout version.
    pub format: u32,
    /// Metadata version tag of the exporting store.
    pub metadata_version: String,
    /// Whether type definitions are embedded.
    pub has_metadata: bool,
    /// Number of entities.
    pub entity_count: usize,
    /// Number of temporary keys.
    pub temp_key_count: usize,
    /// Entity counts per type and state.
    pub counts: Vec<TypeStateCount>,
    /// One line per entity (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<EntitySummary>>,
}

/// Number of entities of one type in one state.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TypeStateCount {
    /// Entity type name.
    pub type_name: String,
    /// Entity state.
    pub state: EntityState,
    /// Number of entities.
    pub count: usize,
}

/// Summary of a single exported entity.
#[derive(Debug, Serialize)]
pub struct EntitySummary {
    /// Entity type name.
    pub type_name: String,
    /// Entity state.
    pub state: EntityState,
    /// Key values, when the bundle embeds metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Names of properties with original values.
    pub changed: Vec<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str, show_entities: bool) -> Result<(), Box<dyn Error>> {
    let result = analyze(path, show_entities)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "text" => print_text_output(&result),
        other => return Err(format!("unknown output format '{other}' (expected text or json)").into()),
    }
    Ok(())
}

/// Reads and summarizes the bundle at `path`.
pub fn analyze(path: &Path, show_entities: bool) -> Result<InspectResult, Box<dyn Error>> {
    if !path.exists() {
        return Err(format!("No bundle found at {}", path.display()).into());
    }
    let bytes = std::fs::read(path)?;
    let encoding = if bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{') {
        "json"
    } else {
        "cbor"
    };
    let bundle = ExportBundle::from_bytes(&bytes)?;
    tracing::debug!(path = %path.display(), encoding, entities = bundle.entities.len(), "bundle read");

    let counts = bundle
        .counts()
        .into_iter()
        .map(|((type_name, state), count)| TypeStateCount {
            type_name,
            state,
            count,
        })
        .collect();
    let entities = show_entities.then(|| {
        bundle
            .entities
            .iter()
            .map(|e| summarize(e, bundle.metadata.as_ref()))
            .collect()
    });

    Ok(InspectResult {
        path: path.display().to_string(),
        encoding,
        size: bytes.len() as u64,
        format: bundle.format,
        metadata_version: bundle.metadata_version.clone(),
        has_metadata: bundle.metadata.is_some(),
        entity_count: bundle.entities.len(),
        temp_key_count: bundle.temp_keys.len(),
        counts,
        entities,
    })
}

fn summarize(entity: &ExportedEntity, metadata: Option<&MetadataSnapshot>) -> EntitySummary {
    let key = metadata
        .and_then(|m| m.entity_types.iter().find(|t| t.name() == entity.type_name))
        .map(|entity_type| {
            entity_type
                .key_properties()
                .map(|p| {
                    entity
                        .values
                        .get(p.name())
                        .map_or_else(|| "?".to_string(), ToString::to_string)
                })
                .collect::<Vec<_>>()
                .join(",")
        });
    EntitySummary {
        type_name: entity.type_name.clone(),
        state: entity.state,
        key,
        changed: entity.original_values.keys().cloned().collect(),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("entitrack Bundle Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", result.path);
    println!("Encoding: {} ({})", result.encoding, format_size(result.size));
    println!("Format: {}", result.format);
    println!();
    println!("Metadata:");
    println!("  Version:  {}", result.metadata_version);
    println!("  Embedded: {}", if result.has_metadata { "yes" } else { "no" });
    println!();
    println!("Entities:");
    println!("  Total:     {}", result.entity_count);
    println!("  Temp keys: {}", result.temp_key_count);
    for count in &result.counts {
        println!("  {:<24} {:<10} {}", count.type_name, count.state, count.count);
    }

    if let Some(entities) = &result.entities {
        println!();
        println!("Entity list:");
        for e in entities {
            let key = e.key.as_deref().unwrap_or("-");
            if e.changed.is_empty() {
                println!("  {}:({}) {}", e.type_name, key, e.state);
            } else {
                println!("  {}:({}) {} changed: {}", e.type_name, key, e.state, e.changed.join(", "));
            }
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_bundle;

    #[test]
    fn summarizes_json_and_cbor() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = test_bundle();
        let json = dir.path().join("bundle.json");
        let cbor = dir.path().join("bundle.cbor");
        std::fs::write(&json, bundle.to_json().unwrap()).unwrap();
        std::fs::write(&cbor, bundle.encode().unwrap()).unwrap();

        for (path, encoding) in [(&json, "json"), (&cbor, "cbor")] {
            let result = analyze(path, true).unwrap();
            assert_eq!(result.encoding, encoding);
            assert_eq!(result.metadata_version, "sample-1");
            assert!(result.has_metadata);
            assert_eq!(result.entity_count, 2);
            assert_eq!(result.temp_key_count, 1);
            assert_eq!(
                result.counts,
                vec![
                    TypeStateCount {
                        type_name: "Order".to_string(),
                        state: EntityState::Added,
                        count: 1,
                    },
                    TypeStateCount {
                        type_name: "Order".to_string(),
                        state: EntityState::Modified,
                        count: 1,
                    },
                ]
            );
            let entities = result.entities.unwrap();
            assert_eq!(entities[0].key.as_deref(), Some("-1"));
            assert_eq!(entities[1].changed, vec!["shipName".to_string()]);
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = analyze(&dir.path().join("nope.json"), false).unwrap_err();
        assert!(err.to_string().contains("No bundle found"));
    }
}
