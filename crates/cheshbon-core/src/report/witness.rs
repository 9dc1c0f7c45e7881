//! Witness computation for all-details reports (pure logic).
//!
//! A witness is the per-impacted-node record a verifier can re-check:
//! reason, root causes (selected by reason class), distance, predecessor,
//! and the triggering event/issue links. Every cap that truncates a list
//! leaves an omission record with first/last sample ids, so the report is
//! honest about what it dropped.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::api::DiffResult;
use crate::errors::CheshbonResult;
use crate::impact::ImpactReason;
use crate::model::spec::MappingSpec;
use crate::report::builders::{build_event_index, build_issues_index};
use crate::report::contract::ReportCaps;

pub struct WitnessPayload {
    pub event_index: Vec<Value>,
    pub issues_index: Vec<Value>,
    pub witnesses: BTreeMap<String, Value>,
    pub summaries: Value,
    pub omissions: Vec<Value>,
}

fn apply_cap(
    items: Vec<String>,
    cap: usize,
    path: &str,
    omissions: &mut Vec<Value>,
) -> Vec<String> {
    if cap == 0 || items.len() <= cap {
        return items;
    }
    let kept = items[..cap].to_vec();
    let omitted = &items[cap..];
    let mut sample: Vec<String> = vec![omitted[0].clone()];
    if omitted.len() > 1 {
        sample.push(omitted[omitted.len() - 1].clone());
    }
    let mut record = Map::new();
    record.insert("path".to_string(), Value::String(path.to_string()));
    record.insert("cap".to_string(), Value::from(cap as u64));
    record.insert("actual".to_string(), Value::from(items.len() as u64));
    record.insert(
        "omitted_count".to_string(),
        Value::from(omitted.len() as u64),
    );
    record.insert("sample_ids".to_string(), serde_json::json!(sample));
    omissions.push(Value::Object(record));
    kept
}

fn reason_of(result: &DiffResult, var_id: &str) -> Option<ImpactReason> {
    result.reasons.get(var_id).copied()
}

fn reason_str(reason: Option<ImpactReason>) -> String {
    reason
        .map(|r| r.as_str().to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Compute witnesses and summaries for the all-details report.
pub fn compute_witnesses(
    result: &DiffResult,
    spec_v1: &MappingSpec,
    spec_v2: &MappingSpec,
    caps: &ReportCaps,
) -> CheshbonResult<WitnessPayload> {
    let mut omissions: Vec<Value> = Vec::new();

    let event_index = build_event_index(&result.events)?;
    let issues_index = build_issues_index(result)?;

    let impacted_ids = apply_cap(
        result.impacted_ids.clone(),
        caps.max_witnesses,
        "details.witnesses",
        &mut omissions,
    );

    let mut witnesses: BTreeMap<String, Value> = BTreeMap::new();

    for var_id in &impacted_ids {
        let reason = reason_of(result, var_id);
        let path = result.paths.get(var_id).cloned().unwrap_or_default();

        // Root-cause selection by reason class.
        let root_cause_ids: Vec<String> = match reason {
            Some(
                ImpactReason::DirectChange
                | ImpactReason::DirectChangeMissingInput
                | ImpactReason::TransformImplChanged
                | ImpactReason::TransformRemoved
                | ImpactReason::MissingTransformRef,
            ) => vec![var_id.clone()],
            Some(ImpactReason::MissingInput) => {
                let missing = result.missing_inputs.get(var_id).cloned().unwrap_or_default();
                if !missing.is_empty() {
                    missing
                } else if !path.is_empty() {
                    vec![path[0].clone()]
                } else {
                    vec![var_id.clone()]
                }
            }
            Some(ImpactReason::MissingBinding) => result
                .missing_bindings
                .get(var_id)
                .cloned()
                .unwrap_or_default(),
            Some(ImpactReason::AmbiguousBinding) => result
                .ambiguous_bindings
                .get(var_id)
                .cloned()
                .unwrap_or_default(),
            Some(ImpactReason::TransitiveDependency) => {
                if !path.is_empty() {
                    vec![path[0].clone()]
                } else {
                    vec![var_id.clone()]
                }
            }
            None => vec![var_id.clone()],
        };
        let root_cause_ids = apply_cap(
            root_cause_ids,
            caps.max_root_causes_per_node,
            &format!("details.witnesses.{var_id}.root_cause_ids"),
            &mut omissions,
        );

        // Distance and predecessor. Binding reasons pin distance to 1 with
        // the first root cause as predecessor; direct reasons pin it to 0.
        let (distance, predecessor): (u64, Option<String>) = match reason {
            Some(r) if r.is_zero_distance() => (0, None),
            Some(ImpactReason::MissingBinding | ImpactReason::AmbiguousBinding) => {
                (1, root_cause_ids.first().cloned())
            }
            _ if path.len() > 1 => ((path.len() - 1) as u64, Some(path[path.len() - 2].clone())),
            _ => (0, None),
        };

        // Triggering events mirror the reason class.
        let mut triggering_event_ids: Vec<String> = Vec::new();
        match reason {
            Some(ImpactReason::DirectChange | ImpactReason::DirectChangeMissingInput) => {
                if let Some(ids) = event_index.ids_by_element.get(var_id) {
                    triggering_event_ids.extend(ids.iter().cloned());
                }
            }
            Some(ImpactReason::MissingInput) => {
                for root_id in &root_cause_ids {
                    if let Some(ids) = event_index.ids_by_element.get(root_id) {
                        triggering_event_ids.extend(ids.iter().cloned());
                    }
                }
            }
            Some(ImpactReason::TransitiveDependency) => {
                if let Some(root_id) = root_cause_ids.first() {
                    if let Some(ids) = event_index.ids_by_element.get(root_id) {
                        triggering_event_ids.extend(ids.iter().cloned());
                    }
                }
            }
            Some(ImpactReason::TransformImplChanged | ImpactReason::TransformRemoved) => {
                let transform_ref = spec_v1
                    .derived_by_id(var_id)
                    .or_else(|| spec_v2.derived_by_id(var_id))
                    .map(|d| d.transform_ref.clone());
                if let Some(transform_ref) = transform_ref {
                    if let Some(ids) = event_index.ids_by_element.get(&transform_ref) {
                        triggering_event_ids.extend(ids.iter().cloned());
                    }
                }
            }
            _ => {}
        }
        triggering_event_ids.sort();
        triggering_event_ids.dedup();
        let triggering_event_ids = apply_cap(
            triggering_event_ids,
            caps.max_trigger_events_per_node,
            &format!("details.witnesses.{var_id}.triggering_event_ids"),
            &mut omissions,
        );

        // Triggering issues for the non-event causes.
        let mut triggering_issue_ids: Vec<String> = Vec::new();
        match reason {
            Some(r @ (ImpactReason::MissingBinding | ImpactReason::AmbiguousBinding)) => {
                for root_id in &root_cause_ids {
                    let key = (
                        r.as_str().to_string(),
                        root_id.clone(),
                        var_id.clone(),
                    );
                    if let Some(issue_id) = issues_index.id_map.get(&key) {
                        triggering_issue_ids.push(issue_id.clone());
                    }
                }
            }
            Some(ImpactReason::MissingTransformRef) => {
                let transform_ref = spec_v2
                    .derived_by_id(var_id)
                    .or_else(|| spec_v1.derived_by_id(var_id))
                    .map(|d| d.transform_ref.clone());
                if let Some(transform_ref) = transform_ref {
                    let key = (
                        "MISSING_TRANSFORM_REF".to_string(),
                        transform_ref,
                        var_id.clone(),
                    );
                    if let Some(issue_id) = issues_index.id_map.get(&key) {
                        triggering_issue_ids.push(issue_id.clone());
                    }
                }
            }
            _ => {}
        }
        triggering_issue_ids.sort();
        triggering_issue_ids.dedup();
        let triggering_issue_ids = apply_cap(
            triggering_issue_ids,
            caps.max_trigger_events_per_node,
            &format!("details.witnesses.{var_id}.triggering_issue_ids"),
            &mut omissions,
        );

        let mut witness = Map::new();
        witness.insert("reason".to_string(), Value::String(reason_str(reason)));
        witness.insert(
            "root_cause_ids".to_string(),
            serde_json::json!(root_cause_ids),
        );
        witness.insert("distance".to_string(), Value::from(distance));
        witness.insert(
            "predecessor".to_string(),
            predecessor.map(Value::String).unwrap_or(Value::Null),
        );
        witness.insert(
            "triggering_event_ids".to_string(),
            serde_json::json!(triggering_event_ids),
        );
        witness.insert(
            "triggering_issue_ids".to_string(),
            serde_json::json!(triggering_issue_ids),
        );
        witnesses.insert(var_id.clone(), Value::Object(witness));
    }

    // Summaries over the included witnesses.
    let mut reason_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut max_distance: u64 = 0;
    let mut root_counts: BTreeMap<String, u64> = BTreeMap::new();
    for witness in witnesses.values() {
        let reason = witness["reason"].as_str().unwrap_or("UNKNOWN").to_string();
        *reason_counts.entry(reason).or_default() += 1;
        let distance = witness["distance"].as_u64().unwrap_or(0);
        max_distance = max_distance.max(distance);
        if let Some(roots) = witness["root_cause_ids"].as_array() {
            for root in roots {
                if let Some(root_id) = root.as_str() {
                    *root_counts.entry(root_id.to_string()).or_default() += 1;
                }
            }
        }
    }

    let mut top_roots: Vec<(String, u64)> = root_counts.into_iter().collect();
    top_roots.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if top_roots.len() > caps.max_top_roots {
        let omitted = &top_roots[caps.max_top_roots..];
        let sample: Vec<String> = omitted.iter().take(2).map(|(id, _)| id.clone()).collect();
        let mut record = Map::new();
        record.insert(
            "path".to_string(),
            Value::String("details.summaries.top_root_causes".to_string()),
        );
        record.insert("cap".to_string(), Value::from(caps.max_top_roots as u64));
        record.insert("actual".to_string(), Value::from(top_roots.len() as u64));
        record.insert("omitted_count".to_string(), Value::from(omitted.len() as u64));
        record.insert("sample_ids".to_string(), serde_json::json!(sample));
        omissions.push(Value::Object(record));
        top_roots.truncate(caps.max_top_roots);
    }
    let top_root_causes: Vec<Value> = top_roots
        .into_iter()
        .map(|(id, count)| serde_json::json!({"id": id, "impacted_count": count}))
        .collect();

    let mut events_by_type: BTreeMap<String, u64> = BTreeMap::new();
    for event in &result.events {
        *events_by_type
            .entry(event.change_type.as_str().to_string())
            .or_default() += 1;
    }

    let summaries = serde_json::json!({
        "reasons": reason_counts,
        "events_by_type": events_by_type,
        "max_distance": max_distance,
        "top_root_causes": top_root_causes,
    });

    Ok(WitnessPayload {
        event_index: event_index.entries,
        issues_index: issues_index.entries,
        witnesses,
        summaries,
        omissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{diff, DetailLevel, DiffInputs};
    use crate::model::compat::parse_spec;
    use serde_json::json;

    fn spec(value: Value) -> MappingSpec {
        parse_spec(&value).unwrap().spec
    }

    fn chain() -> Value {
        json!({
            "spec_version": "1", "study_id": "S1", "source_table": "DM",
            "sources": [{"id": "s:X", "name": "X", "type": "string"}],
            "derived": [
                {"id": "d:A", "name": "A", "type": "string",
                 "transform_ref": "t:copy", "inputs": ["s:X"]},
                {"id": "d:B", "name": "B", "type": "string",
                 "transform_ref": "t:copy", "inputs": ["d:A"]}
            ]
        })
    }

    fn result_with_type_change() -> (DiffResult, MappingSpec, MappingSpec) {
        let v1 = spec(chain());
        let mut raw = chain();
        raw["derived"][0]["type"] = json!("int");
        let v2 = spec(raw);
        let inputs = DiffInputs {
            spec_v1: &v1,
            spec_v2: &v2,
            registry_v1: None,
            registry_v2: None,
            bindings_v2: None,
        };
        (diff(&inputs, DetailLevel::Full).unwrap(), v1, v2)
    }

    #[test]
    fn direct_witness_has_zero_distance_and_event_link() {
        let (result, v1, v2) = result_with_type_change();
        let payload =
            compute_witnesses(&result, &v1, &v2, &ReportCaps::default()).unwrap();

        let a = payload.witnesses["d:A"].as_object().unwrap();
        assert_eq!(a["reason"], json!("DIRECT_CHANGE"));
        assert_eq!(a["distance"], json!(0));
        assert_eq!(a["predecessor"], Value::Null);
        assert_eq!(a["root_cause_ids"], json!(["d:A"]));
        assert_eq!(a["triggering_event_ids"].as_array().unwrap().len(), 1);
        assert!(a["triggering_issue_ids"].as_array().unwrap().is_empty());

        let b = payload.witnesses["d:B"].as_object().unwrap();
        assert_eq!(b["reason"], json!("TRANSITIVE_DEPENDENCY"));
        assert_eq!(b["distance"], json!(1));
        assert_eq!(b["predecessor"], json!("d:A"));
        assert_eq!(b["root_cause_ids"], json!(["d:A"]));
    }

    #[test]
    fn summaries_reconcile_with_witnesses() {
        let (result, v1, v2) = result_with_type_change();
        let payload =
            compute_witnesses(&result, &v1, &v2, &ReportCaps::default()).unwrap();
        let summaries = payload.summaries.as_object().unwrap();
        assert_eq!(summaries["reasons"]["DIRECT_CHANGE"], json!(1));
        assert_eq!(summaries["reasons"]["TRANSITIVE_DEPENDENCY"], json!(1));
        assert_eq!(summaries["max_distance"], json!(1));
        assert_eq!(
            summaries["events_by_type"]["DERIVED_TYPE_CHANGED"],
            json!(1)
        );
        let top = summaries["top_root_causes"].as_array().unwrap();
        assert_eq!(top[0]["id"], json!("d:A"));
        assert_eq!(top[0]["impacted_count"], json!(2));
        assert!(payload.omissions.is_empty());
    }

    #[test]
    fn witness_cap_records_omission_with_samples() {
        let (result, v1, v2) = result_with_type_change();
        let caps = ReportCaps {
            max_witnesses: 1,
            ..ReportCaps::default()
        };
        let payload = compute_witnesses(&result, &v1, &v2, &caps).unwrap();
        assert_eq!(payload.witnesses.len(), 1);
        assert_eq!(payload.omissions.len(), 1);
        let omission = payload.omissions[0].as_object().unwrap();
        assert_eq!(omission["path"], json!("details.witnesses"));
        assert_eq!(omission["cap"], json!(1));
        assert_eq!(omission["actual"], json!(2));
        assert_eq!(omission["omitted_count"], json!(1));
        assert_eq!(omission["sample_ids"], json!(["d:B"]));
    }
}
