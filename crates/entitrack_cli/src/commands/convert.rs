//! Convert command implementation.

use entitrack_core::ExportBundle;
use std::error::Error;
use std::path::Path;
use tracing::info;

/// Target encoding of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Pretty-printed JSON.
    Json,
    /// Canonical CBOR.
    Cbor,
}

impl Encoding {
    /// Parses `json` or `cbor`.
    pub fn parse(name: &str) -> Result<Self, Box<dyn Error>> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "cbor" => Ok(Encoding::Cbor),
            other => Err(format!("unknown encoding '{other}' (expected json or cbor)").into()),
        }
    }
}

/// Runs the convert command. Returns the number of bytes written.
pub fn run(input: &Path, output: &Path, to: &str) -> Result<u64, Box<dyn Error>> {
    let encoding = Encoding::parse(to)?;
    if !input.exists() {
        return Err(format!("No bundle found at {}", input.display()).into());
    }
    let bundle = ExportBundle::from_bytes(&std::fs::read(input)?)?;
    let bytes = match encoding {
        Encoding::Json => bundle.to_json()?.into_bytes(),
        Encoding::Cbor => bundle.encode()?,
    };
    std::fs::write(output, &bytes)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        ?encoding,
        entities = bundle.entities.len(),
        "bundle converted"
    );
    Ok(bytes.len() as u64)
}
