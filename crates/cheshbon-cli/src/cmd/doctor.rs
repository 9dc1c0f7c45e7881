use std::path::Path;

use anyhow::Result;

use cheshbon_core::report::doctor::{run_doctor, DoctorInputs, DoctorMode};

use crate::{io, output};

#[allow(clippy::too_many_arguments)]
pub fn run(
    report: &Path,
    from: &Path,
    to: &Path,
    from_registry: Option<&Path>,
    to_registry: Option<&Path>,
    bindings: Option<&Path>,
    raw_schema: Option<&Path>,
    strict: bool,
) -> Result<u8> {
    let report_value = io::read_json(report)?;
    let spec_v1 = io::load_spec(from)?;
    let spec_v2 = io::load_spec(to)?;
    let registry_v1 = from_registry.map(io::load_registry).transpose()?;
    let registry_v2 = to_registry.map(io::load_registry).transpose()?;
    let bindings_v2 = bindings.map(io::load_bindings).transpose()?;
    let raw_schema_value = raw_schema.map(io::read_json).transpose()?;

    let inputs = DoctorInputs {
        spec_v1: &spec_v1,
        spec_v2: &spec_v2,
        registry_v1: registry_v1.as_ref(),
        registry_v2: registry_v2.as_ref(),
        bindings_v2: bindings_v2.as_ref(),
        raw_schema: raw_schema_value.as_ref(),
    };
    let mode = if strict {
        DoctorMode::Strict
    } else {
        DoctorMode::Sample
    };

    let verdict = run_doctor(&report_value, &inputs, mode);
    output::print_json(&verdict.to_value())?;
    output::print_verdict(
        verdict.ok,
        &format!("{} clause(s) checked", verdict.clauses.len()),
    );
    Ok(if verdict.ok { 0 } else { 2 })
}
