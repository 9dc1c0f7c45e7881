use std::path::Path;

use anyhow::{Context, Result};

use cheshbon_core::api::{diff, diff_all_details, DetailLevel, DiffInputs, RunStatus};
use cheshbon_core::canonical::canonical_dumps;
use cheshbon_core::report::all_details::core_json_report;

use crate::args::ReportMode;
use crate::{io, output};

#[allow(clippy::too_many_arguments)]
pub fn run(
    from: &Path,
    to: &Path,
    from_registry: Option<&Path>,
    to_registry: Option<&Path>,
    bindings: Option<&Path>,
    raw_schema: Option<&Path>,
    report: ReportMode,
    out: Option<&Path>,
) -> Result<u8> {
    let spec_v1 = io::load_spec(from)?;
    let spec_v2 = io::load_spec(to)?;
    let registry_v1 = from_registry.map(io::load_registry).transpose()?;
    let registry_v2 = to_registry.map(io::load_registry).transpose()?;
    let bindings_v2 = bindings.map(io::load_bindings).transpose()?;
    let raw_schema_value = raw_schema.map(io::read_json).transpose()?;

    let inputs = DiffInputs {
        spec_v1: &spec_v1,
        spec_v2: &spec_v2,
        registry_v1: registry_v1.as_ref(),
        registry_v2: registry_v2.as_ref(),
        bindings_v2: bindings_v2.as_ref(),
    };

    if report == ReportMode::AllDetails {
        let artifact = diff_all_details(&inputs, raw_schema_value.as_ref(), None)?;
        let exit = match artifact["run_status"].as_str() {
            Some("non_executable") => 2,
            Some("impacted") => 1,
            _ => 0,
        };
        // The all-details artifact is always written in canonical form.
        let content = canonical_dumps(&artifact)?;
        emit(out, "impact.all-details.json", &format!("{content}\n"))?;
        return Ok(exit);
    }

    let detail_level = match report {
        ReportMode::Core => DetailLevel::Core,
        _ => DetailLevel::Full,
    };
    let result = diff(&inputs, detail_level)?;
    let status = RunStatus::of(&result);

    let rendered = match report {
        ReportMode::Core => serde_json::to_string_pretty(&core_json_report(&result)?)?,
        _ => serde_json::to_string_pretty(&result)?,
    };
    emit(out, "impact.json", &rendered)?;
    output::print_verdict(status != RunStatus::NonExecutable, status.as_str());

    Ok(status.exit_code() as u8)
}

fn emit(out: Option<&Path>, file_name: &str, content: &str) -> Result<()> {
    match out {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let path = dir.join(file_name);
            std::fs::write(&path, content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            output::eprintln_line(&format!("wrote {}", path.display()));
        }
        None => println!("{content}"),
    }
    Ok(())
}
