//! All-details report builder (machine-first JSON artifact).
//!
//! The report body is addressed by digest: each input gets a canonical
//! digest, and `core_digest` covers the core subset of the computed result
//! (validation state, events, impacted/unaffected ids, reasons, missing
//! sets). A verifier recomputes both without re-trusting the report.

use serde_json::{Map, Value};

use crate::api::{DiffInputs, DiffResult, RunStatus};
use crate::errors::{CheshbonError, CheshbonResult};
use crate::hash::sha256_canonical;
use crate::report::contract::{
    ReportCaps, ALL_DETAILS_SCHEMA_VERSION, CANONICALIZATION_POLICY_ID, VERIFIER_CONTRACT_VERSION,
};
use crate::report::witness::compute_witnesses;

fn to_value<T: serde::Serialize>(value: &T, what: &str) -> CheshbonResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| CheshbonError::serialization(format!("failed to serialize {what}: {e}")))
}

/// The minimal JSON report (no paths, no explanations) shared by the `core`
/// detail level and the all-details body.
pub fn core_json_report(result: &DiffResult) -> CheshbonResult<Value> {
    let total_events: u64 = result.change_summary.values().sum();
    let spec_events: u64 = result
        .change_summary
        .iter()
        .filter(|(event_type, _)| !event_type.starts_with("TRANSFORM_"))
        .map(|(_, count)| count)
        .sum();
    let registry_events = total_events - spec_events;
    let missing_bindings_count: u64 = result
        .missing_bindings
        .values()
        .map(|ids| ids.len() as u64)
        .sum();
    let missing_transforms_count: u64 = result
        .missing_transform_refs
        .values()
        .map(|ids| ids.len() as u64)
        .sum();

    Ok(serde_json::json!({
        "run_status": RunStatus::of(result).as_str(),
        "validation_failed": result.validation_failed,
        "validation_errors": result.validation_errors,
        "summary": {
            "total_events": total_events,
            "spec_events": spec_events,
            "registry_events": registry_events,
            "impacted_count": result.impacted_ids.len(),
            "unaffected_count": result.unaffected_ids.len(),
            "missing_bindings_count": missing_bindings_count,
            "missing_transforms_count": missing_transforms_count,
        },
        "change_events": to_value(&result.events, "events")?,
        "impacted": result.impacted_ids,
        "unaffected": result.unaffected_ids,
        "reasons": to_value(&result.reasons, "reasons")?,
        "missing_inputs": result.missing_inputs,
        "missing_bindings": result.missing_bindings,
        "ambiguous_bindings": result.ambiguous_bindings,
        "missing_transform_refs": result.missing_transform_refs,
    }))
}

/// Digest the core subset of a diff result: the canonical witness for "did
/// the computation reproduce". Paths and alternative-path counts are not
/// part of the subset, so `full` and `core` runs digest identically.
pub fn core_subset_digest(result: &DiffResult) -> CheshbonResult<String> {
    let subset = serde_json::json!({
        "validation_failed": result.validation_failed,
        "validation_errors": result.validation_errors,
        "events": to_value(&result.events, "events")?,
        "impacted_ids": result.impacted_ids,
        "unaffected_ids": result.unaffected_ids,
        "reasons": to_value(&result.reasons, "reasons")?,
        "missing_inputs": result.missing_inputs,
        "missing_bindings": result.missing_bindings,
        "missing_transform_refs": result.missing_transform_refs,
    });
    sha256_canonical(&subset)
}

fn input_digest(value: &Value) -> CheshbonResult<Value> {
    Ok(serde_json::json!({
        "digest": sha256_canonical(value)?,
        "canonicalization": CANONICALIZATION_POLICY_ID,
    }))
}

fn optional_input_digest(value: Option<Value>) -> CheshbonResult<Value> {
    match value {
        Some(v) => input_digest(&v),
        None => Ok(Value::Null),
    }
}

/// Per-input digests over the normalized models (not file bytes).
pub fn input_digests(
    inputs: &DiffInputs,
    raw_schema: Option<&Value>,
) -> CheshbonResult<Value> {
    Ok(serde_json::json!({
        "spec_v1": input_digest(&inputs.spec_v1.to_value()?)?,
        "spec_v2": input_digest(&inputs.spec_v2.to_value()?)?,
        "registry_v1": optional_input_digest(
            inputs.registry_v1.map(|r| r.to_value()).transpose()?
        )?,
        "registry_v2": optional_input_digest(
            inputs.registry_v2.map(|r| r.to_value()).transpose()?
        )?,
        "bindings_v2": optional_input_digest(
            inputs.bindings_v2.map(|b| b.to_value()).transpose()?
        )?,
        "raw_schema_v2": optional_input_digest(raw_schema.cloned())?,
    }))
}

/// Assemble the all-details report.
pub fn build_all_details_report(
    result: &DiffResult,
    inputs: &DiffInputs,
    raw_schema: Option<&Value>,
    caps: &ReportCaps,
) -> CheshbonResult<Value> {
    let core_report = core_json_report(result)?;
    let payload = compute_witnesses(result, inputs.spec_v1, inputs.spec_v2, caps)?;

    let mut report = Map::new();
    report.insert(
        "report_schema_version".to_string(),
        Value::String(ALL_DETAILS_SCHEMA_VERSION.to_string()),
    );
    report.insert(
        "verifier_contract_version".to_string(),
        Value::String(VERIFIER_CONTRACT_VERSION.to_string()),
    );
    report.insert(
        "canonicalization_policy_id".to_string(),
        Value::String(CANONICALIZATION_POLICY_ID.to_string()),
    );
    report.insert("inputs".to_string(), input_digests(inputs, raw_schema)?);
    report.insert(
        "core_digest".to_string(),
        Value::String(core_subset_digest(result)?),
    );

    if let Value::Object(fields) = core_report {
        for (key, value) in fields {
            report.insert(key, value);
        }
    }

    let witnesses: Map<String, Value> = payload.witnesses.into_iter().collect();
    report.insert(
        "details".to_string(),
        serde_json::json!({
            "event_index": payload.event_index,
            "issues_index": payload.issues_index,
            "witnesses": witnesses,
            "summaries": payload.summaries,
            "caps": caps.to_value(),
            "omissions": payload.omissions,
        }),
    );

    Ok(Value::Object(report))
}
