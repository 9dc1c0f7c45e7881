//! File loading for the CLI. The core is I/O-free; every path ends here.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use cheshbon_core::model::bindings::Bindings;
use cheshbon_core::model::compat::parse_spec;
use cheshbon_core::model::registry::TransformRegistry;
use cheshbon_core::model::spec::MappingSpec;

use crate::output;

pub fn read_json(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse JSON in {}", path.display()))
}

/// Load a spec through the compatibility layer; parse warnings go to
/// stderr so stdout stays machine-readable.
pub fn load_spec(path: &Path) -> Result<MappingSpec> {
    let value = read_json(path)?;
    let parsed = parse_spec(&value)
        .with_context(|| format!("invalid spec in {}", path.display()))?;
    for warning in &parsed.warnings {
        output::eprintln_line(&format!("warning: {}: {warning}", path.display()));
    }
    Ok(parsed.spec)
}

pub fn load_registry(path: &Path) -> Result<TransformRegistry> {
    let value = read_json(path)?;
    TransformRegistry::from_value(&value)
        .with_context(|| format!("invalid registry in {}", path.display()))
}

pub fn load_bindings(path: &Path) -> Result<Bindings> {
    let value = read_json(path)?;
    Bindings::from_value(&value)
        .with_context(|| format!("invalid bindings in {}", path.display()))
}
