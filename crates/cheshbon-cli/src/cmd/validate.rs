use std::path::Path;

use anyhow::Result;

use cheshbon_core::api::validate;

use crate::{io, output};

pub fn run(
    spec: &Path,
    registry: Option<&Path>,
    bindings: Option<&Path>,
    raw_schema: Option<&Path>,
) -> Result<u8> {
    // validate() consumes raw documents: structural failures must surface
    // as coded issues, not as CLI errors.
    let spec_value = io::read_json(spec)?;
    let registry_value = registry.map(io::read_json).transpose()?;
    let bindings_value = bindings.map(io::read_json).transpose()?;
    let raw_schema_value = raw_schema.map(io::read_json).transpose()?;

    let result = validate(
        &spec_value,
        registry_value.as_ref(),
        bindings_value.as_ref(),
        raw_schema_value.as_ref(),
    );

    output::print_json(&result)?;
    output::print_verdict(
        result.ok,
        &format!(
            "{} error(s), {} warning(s)",
            result.errors.len(),
            result.warnings.len()
        ),
    );
    Ok(if result.ok { 0 } else { 2 })
}
