//! Report doctor: independently re-check an all-details artifact.
//!
//! Given a report and the inputs it claims to be derived from, the doctor
//! recomputes the analysis and emits an ordered list of clauses
//! `{id, ok, details}`:
//! 1. `header_contract`: schema/contract/policy constants match
//! 2. `inputs_digest`: every recorded input digest matches a fresh digest
//! 3. `core_digest`: the core subset reproduces
//! 4. `witness_invariants`: per-witness semantic checks (bounded distance
//!    sweep in `sample` mode, exhaustive in `strict`)
//! 5. `accounting_invariants`: caps, omission honesty, summary totals
//!
//! The doctor never fails out: every internal error becomes a failing
//! clause with the error in its details.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::api::{diff_internal, DetailLevel, DiffInputs, DiffResult};
use crate::graph::DependencyGraph;
use crate::model::bindings::Bindings;
use crate::model::registry::TransformRegistry;
use crate::model::spec::MappingSpec;
use crate::report::all_details::{core_subset_digest, input_digests};
use crate::report::builders::build_issues_index;
use crate::report::contract::{
    ALL_DETAILS_SCHEMA_VERSION, CANONICALIZATION_POLICY_ID, VERIFIER_CONTRACT_VERSION,
};

const ZERO_DISTANCE_REASONS: [&str; 5] = [
    "DIRECT_CHANGE",
    "DIRECT_CHANGE_MISSING_INPUT",
    "TRANSFORM_IMPL_CHANGED",
    "TRANSFORM_REMOVED",
    "MISSING_TRANSFORM_REF",
];
const NO_EVENT_REASONS: [&str; 3] = [
    "MISSING_BINDING",
    "AMBIGUOUS_BINDING",
    "MISSING_TRANSFORM_REF",
];
const ISSUE_BACKED_REASONS: [&str; 3] = [
    "MISSING_BINDING",
    "AMBIGUOUS_BINDING",
    "MISSING_TRANSFORM_REF",
];

const DISTANCE_SAMPLE_N: usize = 50;
const DISTANCE_SAMPLE_M: usize = 10;
const DISTANCE_RULE_ID: &str = "v1:first_last_max_suspicious";

/// How many witnesses the distance sweep covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoctorMode {
    Sample,
    Strict,
}

impl DoctorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::Strict => "strict",
        }
    }
}

/// The inputs the report claims to be derived from, parsed.
#[derive(Debug, Clone, Copy)]
pub struct DoctorInputs<'a> {
    pub spec_v1: &'a MappingSpec,
    pub spec_v2: &'a MappingSpec,
    pub registry_v1: Option<&'a TransformRegistry>,
    pub registry_v2: Option<&'a TransformRegistry>,
    pub bindings_v2: Option<&'a Bindings>,
    pub raw_schema: Option<&'a Value>,
}

impl<'a> DoctorInputs<'a> {
    fn diff_inputs(&self) -> DiffInputs<'a> {
        DiffInputs {
            spec_v1: self.spec_v1,
            spec_v2: self.spec_v2,
            registry_v1: self.registry_v1,
            registry_v2: self.registry_v2,
            bindings_v2: self.bindings_v2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorClause {
    pub id: String,
    pub ok: bool,
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub ok: bool,
    pub clauses: Vec<DoctorClause>,
    pub summary: Value,
}

impl DoctorReport {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("doctor reports are plain JSON")
    }
}

fn push_detail(details: &mut Map<String, Value>, key: &str, value: Value) {
    details
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .expect("detail lists are arrays")
        .push(value);
}

fn expected_witness_ids(result: &DiffResult) -> Vec<String> {
    result
        .impacted_ids
        .iter()
        .filter(|id| id.starts_with("d:"))
        .cloned()
        .collect()
}

fn witness_str<'v>(witness: &'v Value, key: &str) -> Option<&'v str> {
    witness.get(key).and_then(Value::as_str)
}

fn witness_list(witness: &Value, key: &str) -> Vec<String> {
    witness
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Deterministic selection of witnesses for the distance sweep: all
/// suspicious ones (distance/reason disagreements), max-distance nodes up
/// to M, then first/last ids until N.
fn select_distance_ids(
    witnesses: &Map<String, Value>,
    mode: DoctorMode,
) -> Vec<String> {
    let ids: Vec<String> = witnesses.keys().cloned().collect();
    if mode == DoctorMode::Strict {
        return ids;
    }

    let mut must_check: BTreeSet<String> = BTreeSet::new();
    let mut max_distance: u64 = 0;
    for (var_id, witness) in witnesses {
        let reason = witness_str(witness, "reason").unwrap_or("");
        let distance = witness.get("distance").and_then(Value::as_u64).unwrap_or(0);
        let predecessor = witness_str(witness, "predecessor");
        if reason == "DIRECT_CHANGE" || reason == "DIRECT_CHANGE_MISSING_INPUT" {
            must_check.insert(var_id.clone());
        }
        max_distance = max_distance.max(distance);
        if distance == 0 && !ZERO_DISTANCE_REASONS.contains(&reason) {
            must_check.insert(var_id.clone());
        }
        if distance > 0 && ZERO_DISTANCE_REASONS.contains(&reason) {
            must_check.insert(var_id.clone());
        }
        if distance == 0 && predecessor.is_some() {
            must_check.insert(var_id.clone());
        }
    }

    let mut selected: Vec<String> = must_check.iter().cloned().collect();

    if max_distance > 0 {
        let max_distance_ids: Vec<&String> = witnesses
            .iter()
            .filter(|(_, w)| w.get("distance").and_then(Value::as_u64).unwrap_or(0) == max_distance)
            .map(|(id, _)| id)
            .collect();
        for var_id in max_distance_ids {
            if !must_check.contains(var_id) && selected.len() < DISTANCE_SAMPLE_N + DISTANCE_SAMPLE_M
            {
                selected.push(var_id.clone());
            }
            if selected.len() >= must_check.len() + DISTANCE_SAMPLE_M {
                break;
            }
        }
    }

    let selected_set: BTreeSet<&String> = selected.iter().collect();
    let remaining: Vec<&String> = ids.iter().filter(|id| !selected_set.contains(id)).collect();
    let mut left = 0usize;
    let mut right = remaining.len();
    while selected.len() < DISTANCE_SAMPLE_N && left < right {
        selected.push(remaining[left].clone());
        left += 1;
        if selected.len() >= DISTANCE_SAMPLE_N || left >= right {
            break;
        }
        selected.push(remaining[right - 1].clone());
        right -= 1;
    }

    selected
}

/// Re-check an all-details report against its inputs.
pub fn run_doctor(report: &Value, inputs: &DoctorInputs, mode: DoctorMode) -> DoctorReport {
    let mut clauses: Vec<DoctorClause> = Vec::new();

    // 1. Header contract.
    {
        let mut details = Map::new();
        let mut ok = true;
        for (field, expected) in [
            ("report_schema_version", ALL_DETAILS_SCHEMA_VERSION),
            ("verifier_contract_version", VERIFIER_CONTRACT_VERSION),
            ("canonicalization_policy_id", CANONICALIZATION_POLICY_ID),
        ] {
            if report.get(field).and_then(Value::as_str) != Some(expected) {
                ok = false;
                details.insert(
                    field.to_string(),
                    report.get(field).cloned().unwrap_or(Value::Null),
                );
            }
        }
        clauses.push(DoctorClause {
            id: "header_contract".to_string(),
            ok,
            details,
        });
    }

    // 2. Input digests.
    {
        let mut details = Map::new();
        let mut ok = true;
        match input_digests(&inputs.diff_inputs(), inputs.raw_schema) {
            Ok(expected) => {
                let reported_inputs = report.get("inputs");
                for (key, expected_entry) in expected.as_object().expect("inputs is an object") {
                    let expected_digest = expected_entry.get("digest").and_then(Value::as_str);
                    let reported_digest = reported_inputs
                        .and_then(|v| v.get(key))
                        .and_then(|v| v.get("digest"))
                        .and_then(Value::as_str);
                    if expected_digest != reported_digest {
                        ok = false;
                        details.insert(
                            key.clone(),
                            serde_json::json!({
                                "expected": expected_digest,
                                "reported": reported_digest,
                            }),
                        );
                    }
                }
            }
            Err(e) => {
                ok = false;
                details.insert("error".to_string(), Value::String(e.to_string()));
            }
        }
        clauses.push(DoctorClause {
            id: "inputs_digest".to_string(),
            ok,
            details,
        });
    }

    // 3. Core digest (the recomputed result is reused by later clauses).
    let computation = diff_internal(&inputs.diff_inputs(), DetailLevel::Core);
    {
        let mut details = Map::new();
        let mut ok = true;
        match &computation {
            Ok(c) => match core_subset_digest(&c.result) {
                Ok(expected) => {
                    let reported = report.get("core_digest").and_then(Value::as_str);
                    if reported != Some(expected.as_str()) {
                        ok = false;
                        details.insert("expected".to_string(), Value::String(expected));
                        details.insert(
                            "reported".to_string(),
                            reported.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null),
                        );
                    }
                }
                Err(e) => {
                    ok = false;
                    details.insert("error".to_string(), Value::String(e.to_string()));
                }
            },
            Err(e) => {
                ok = false;
                details.insert("error".to_string(), Value::String(e.to_string()));
            }
        }
        clauses.push(DoctorClause {
            id: "core_digest".to_string(),
            ok,
            details,
        });
    }

    // 4. Witness invariants.
    {
        let mut details = Map::new();
        let mut ok = true;
        match &computation {
            Ok(c) => {
                check_witness_invariants(
                    report,
                    &c.result,
                    &c.graph_v1,
                    &c.graph_v2,
                    inputs,
                    mode,
                    &mut ok,
                    &mut details,
                );
            }
            Err(e) => {
                ok = false;
                details.insert(
                    "error".to_string(),
                    Value::String(format!("diff result unavailable: {e}")),
                );
            }
        }
        clauses.push(DoctorClause {
            id: "witness_invariants".to_string(),
            ok,
            details,
        });
    }

    // 5. Accounting invariants.
    {
        let mut details = Map::new();
        let mut ok = true;
        match &computation {
            Ok(c) => check_accounting_invariants(report, &c.result, &mut ok, &mut details),
            Err(e) => {
                ok = false;
                details.insert(
                    "error".to_string(),
                    Value::String(format!("diff result unavailable: {e}")),
                );
            }
        }
        clauses.push(DoctorClause {
            id: "accounting_invariants".to_string(),
            ok,
            details,
        });
    }

    let overall_ok = clauses.iter().all(|c| c.ok);
    let failed: Vec<&str> = clauses
        .iter()
        .filter(|c| !c.ok)
        .map(|c| c.id.as_str())
        .collect();
    let summary = serde_json::json!({
        "total_clauses": clauses.len(),
        "ok_clauses": clauses.iter().filter(|c| c.ok).count(),
        "failed_clauses": failed.len(),
        "failed_clause_ids": failed,
    });

    DoctorReport {
        ok: overall_ok,
        clauses,
        summary,
    }
}

#[allow(clippy::too_many_arguments)]
fn check_witness_invariants(
    report: &Value,
    result: &DiffResult,
    graph_v1: &DependencyGraph,
    graph_v2: &DependencyGraph,
    inputs: &DoctorInputs,
    mode: DoctorMode,
    ok: &mut bool,
    details: &mut Map<String, Value>,
) {
    let empty = Map::new();
    let report_details = report
        .get("details")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let witnesses = report_details
        .get("witnesses")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let expected_ids: BTreeSet<String> = expected_witness_ids(result).into_iter().collect();
    let witness_ids: BTreeSet<String> = witnesses.keys().cloned().collect();
    let unexpected: Vec<&String> = witness_ids.difference(&expected_ids).collect();
    if !unexpected.is_empty() {
        *ok = false;
        details.insert(
            "unexpected_witness_ids".to_string(),
            serde_json::json!(unexpected),
        );
    }

    let event_map: BTreeMap<&str, &Value> = report_details
        .get("event_index")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("event_id").and_then(Value::as_str).map(|id| (id, e)))
                .collect()
        })
        .unwrap_or_default();
    let issue_map: BTreeMap<&str, &Value> = report_details
        .get("issues_index")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|i| i.get("issue_id").and_then(Value::as_str).map(|id| (id, i)))
                .collect()
        })
        .unwrap_or_default();

    let allowed_v1_reasons = [
        "MISSING_INPUT",
        "DIRECT_CHANGE_MISSING_INPUT",
        "TRANSITIVE_DEPENDENCY",
    ];

    let distance_ids: BTreeSet<String> =
        select_distance_ids(&witnesses, mode).into_iter().collect();
    let mut distance_failed: Vec<String> = Vec::new();

    for (var_id, witness) in &witnesses {
        let reason = witness_str(witness, "reason").unwrap_or("");
        let expected_reason = result.reasons.get(var_id).map(|r| r.as_str());
        if expected_reason != Some(reason) {
            *ok = false;
            push_detail(details, "reason_mismatch", Value::String(var_id.clone()));
        }

        let root_ids = witness_list(witness, "root_cause_ids");
        let predecessor = witness_str(witness, "predecessor").map(str::to_string);
        let distance = witness.get("distance").and_then(Value::as_u64).unwrap_or(0);
        let trig_events = witness_list(witness, "triggering_event_ids");
        let trig_issues = witness_list(witness, "triggering_issue_ids");

        // Root causes exist in graph v2 (or v1 for removed/missing reasons).
        for root_id in &root_ids {
            if graph_v2.contains(root_id) {
                continue;
            }
            if allowed_v1_reasons.contains(&reason) && graph_v1.contains(root_id) {
                continue;
            }
            *ok = false;
            push_detail(
                details,
                "invalid_root_cause_id",
                Value::String(root_id.clone()),
            );
        }

        // Event/issue linkage matches the reason class.
        if NO_EVENT_REASONS.contains(&reason) {
            if !trig_events.is_empty() {
                *ok = false;
                push_detail(details, "event_linkage", Value::String(var_id.clone()));
            }
        } else if !trig_issues.is_empty() {
            *ok = false;
            push_detail(details, "issue_linkage", Value::String(var_id.clone()));
        }
        if ISSUE_BACKED_REASONS.contains(&reason) && trig_issues.is_empty() {
            *ok = false;
            push_detail(details, "missing_issue_links", Value::String(var_id.clone()));
        }

        // Referenced ids exist in the indexes.
        for event_id in &trig_events {
            if !event_map.contains_key(event_id.as_str()) {
                *ok = false;
                push_detail(details, "missing_event_ids", Value::String(event_id.clone()));
            }
        }
        for issue_id in &trig_issues {
            if !issue_map.contains_key(issue_id.as_str()) {
                *ok = false;
                push_detail(details, "missing_issue_ids", Value::String(issue_id.clone()));
            }
        }

        let transform_ref = inputs
            .spec_v2
            .derived_by_id(var_id)
            .or_else(|| inputs.spec_v1.derived_by_id(var_id))
            .map(|d| d.transform_ref.clone());

        // Event relevance.
        for event_id in &trig_events {
            let Some(event) = event_map.get(event_id.as_str()) else {
                continue;
            };
            let element_id = event.get("element_id").and_then(Value::as_str).unwrap_or("");
            let relevant = match reason {
                "DIRECT_CHANGE" | "DIRECT_CHANGE_MISSING_INPUT" => element_id == var_id,
                "MISSING_INPUT" | "TRANSITIVE_DEPENDENCY" => {
                    root_ids.iter().any(|r| r == element_id)
                }
                "TRANSFORM_IMPL_CHANGED" | "TRANSFORM_REMOVED" => {
                    element_id == var_id || Some(element_id) == transform_ref.as_deref()
                }
                _ => true,
            };
            if !relevant {
                *ok = false;
                push_detail(details, "irrelevant_event", Value::String(var_id.clone()));
            }
        }

        // Issue relevance.
        for issue_id in &trig_issues {
            let Some(issue) = issue_map.get(issue_id.as_str()) else {
                continue;
            };
            let issue_type = issue.get("issue_type").and_then(Value::as_str).unwrap_or("");
            let element_id = issue.get("element_id").and_then(Value::as_str).unwrap_or("");
            let affected_id = issue
                .get("details")
                .and_then(|d| d.get("affected_id"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let relevant = match reason {
                "MISSING_BINDING" | "AMBIGUOUS_BINDING" => {
                    issue_type == reason
                        && root_ids.iter().any(|r| r == element_id)
                        && affected_id == var_id
                }
                "MISSING_TRANSFORM_REF" => {
                    issue_type == reason
                        && Some(element_id) == transform_ref.as_deref()
                        && affected_id == var_id
                }
                _ => true,
            };
            if !relevant {
                *ok = false;
                push_detail(details, "irrelevant_issue", Value::String(var_id.clone()));
            }
        }

        // Predecessor must be an actual graph edge.
        if let Some(pred) = &predecessor {
            let deps_v2 = graph_v2.dependencies(var_id);
            let deps_v1 = graph_v1.dependencies(var_id);
            if !deps_v2.contains(pred) && !deps_v1.contains(pred) {
                *ok = false;
                push_detail(details, "invalid_predecessor", Value::String(var_id.clone()));
            }
        }

        // Bounded distance consistency.
        if distance_ids.contains(var_id) {
            if ZERO_DISTANCE_REASONS.contains(&reason) && distance != 0 {
                *ok = false;
                distance_failed.push(var_id.clone());
            } else if distance > 0 {
                let mut any_path_matches = false;
                for root_id in &root_ids {
                    let graph = if graph_v2.contains(root_id) {
                        graph_v2
                    } else {
                        graph_v1
                    };
                    if let Some(path) = graph.dependency_path(root_id, var_id) {
                        if (path.len() - 1) as u64 == distance {
                            any_path_matches = true;
                            break;
                        }
                    }
                }
                if !any_path_matches {
                    *ok = false;
                    distance_failed.push(var_id.clone());
                }
            }
            if distance == 1 && predecessor.is_some() && !root_ids.is_empty() {
                let pred = predecessor.as_deref().unwrap_or("");
                if !root_ids.iter().any(|r| r == pred) {
                    *ok = false;
                    push_detail(
                        details,
                        "root_predecessor_mismatch",
                        Value::String(var_id.clone()),
                    );
                }
            }
        }
    }

    // Distance-check metadata is always recorded when anything was swept.
    if !distance_ids.is_empty() {
        details.insert(
            "distance_check_mode".to_string(),
            Value::String(mode.as_str().to_string()),
        );
        details.insert(
            "distance_check_n".to_string(),
            Value::from(if mode == DoctorMode::Strict {
                distance_ids.len() as u64
            } else {
                DISTANCE_SAMPLE_N as u64
            }),
        );
        details.insert(
            "distance_check_rule_id".to_string(),
            Value::String(
                if mode == DoctorMode::Strict {
                    "strict:all".to_string()
                } else {
                    DISTANCE_RULE_ID.to_string()
                },
            ),
        );
        details.insert(
            "distance_checked_ids_count".to_string(),
            Value::from(distance_ids.len() as u64),
        );
        if !distance_failed.is_empty() {
            distance_failed.sort();
            distance_failed.dedup();
            let mut sample: Vec<String> = distance_failed.iter().take(2).cloned().collect();
            if distance_failed.len() > 2 {
                sample.extend(
                    distance_failed[distance_failed.len().saturating_sub(2)..]
                        .iter()
                        .cloned(),
                );
            }
            details.insert(
                "distance_failed_ids_sample".to_string(),
                serde_json::json!(sample),
            );
        }
    }
}

fn check_accounting_invariants(
    report: &Value,
    result: &DiffResult,
    ok: &mut bool,
    details: &mut Map<String, Value>,
) {
    let empty = Map::new();
    let report_details = report
        .get("details")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let witnesses = report_details
        .get("witnesses")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let summaries = report_details
        .get("summaries")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let caps = report_details.get("caps").and_then(Value::as_object);
    let omissions = report_details
        .get("omissions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // Caps contract.
    let required_caps = [
        "max_witnesses",
        "max_root_causes_per_node",
        "max_trigger_events_per_node",
        "max_top_roots",
    ];
    let caps_present = caps
        .map(|c| required_caps.iter().all(|k| c.contains_key(*k)))
        .unwrap_or(false);
    if !caps_present {
        *ok = false;
        details.insert("caps_missing".to_string(), Value::Bool(true));
    }

    // Witness count / omission honesty.
    let expected_ids = expected_witness_ids(result);
    let expected_count = expected_ids.len();
    let witness_keys: BTreeSet<String> = witnesses.keys().cloned().collect();
    let max_witnesses = caps
        .and_then(|c| c.get("max_witnesses"))
        .and_then(Value::as_u64)
        .map(|v| v as usize);
    let cap_applied = max_witnesses
        .map(|cap| cap.min(expected_count))
        .unwrap_or(expected_count);
    if witness_keys.len() != cap_applied {
        *ok = false;
        details.insert("witness_count_mismatch".to_string(), Value::Bool(true));
    }

    let witness_omission = omissions.iter().find(|o| {
        o.get("path").and_then(Value::as_str) == Some("details.witnesses")
    });
    if expected_count > cap_applied && witness_omission.is_none() {
        *ok = false;
        details.insert("missing_witness_omission".to_string(), Value::Bool(true));
    }

    // Summaries reconcile with included witnesses.
    let mut reason_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut max_distance: u64 = 0;
    for witness in witnesses.values() {
        let reason = witness
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        *reason_counts.entry(reason).or_default() += 1;
        max_distance =
            max_distance.max(witness.get("distance").and_then(Value::as_u64).unwrap_or(0));
    }
    let expected_reasons =
        serde_json::to_value(&reason_counts).expect("reason counts are plain JSON");
    if summaries.get("reasons") != Some(&expected_reasons) {
        *ok = false;
        details.insert("reasons_mismatch".to_string(), Value::Bool(true));
    }
    if summaries.get("max_distance").and_then(Value::as_u64) != Some(max_distance) {
        *ok = false;
        details.insert("max_distance_mismatch".to_string(), Value::Bool(true));
    }

    // Index lengths match the recomputed counts.
    let event_index_len = report_details
        .get("event_index")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    if event_index_len != result.events.len() {
        *ok = false;
        details.insert(
            "event_index_count_mismatch".to_string(),
            Value::Bool(true),
        );
    }
    match build_issues_index(result) {
        Ok(index) => {
            let issues_index_len = report_details
                .get("issues_index")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            if issues_index_len != index.entries.len() {
                *ok = false;
                details.insert(
                    "issues_index_count_mismatch".to_string(),
                    Value::Bool(true),
                );
            }
        }
        Err(e) => {
            *ok = false;
            details.insert("error".to_string(), Value::String(e.to_string()));
        }
    }

    // Every omission must account exactly.
    for omission in &omissions {
        let cap = omission.get("cap").and_then(Value::as_u64);
        let actual = omission.get("actual").and_then(Value::as_u64);
        let omitted_count = omission.get("omitted_count").and_then(Value::as_u64);
        let path = omission.get("path").and_then(Value::as_str);
        let sample_ids = omission.get("sample_ids").and_then(Value::as_array);
        let (Some(cap), Some(actual), Some(omitted_count), Some(path), Some(_)) =
            (cap, actual, omitted_count, path, sample_ids)
        else {
            *ok = false;
            push_detail(details, "omissions_invalid", omission.clone());
            continue;
        };
        if actual.saturating_sub(cap) != omitted_count {
            *ok = false;
            push_detail(details, "omissions_mismatch", omission.clone());
        }

        if path == "details.witnesses" {
            if let Some(max) = max_witnesses {
                if cap as usize != max {
                    *ok = false;
                    details.insert("witness_cap_mismatch".to_string(), Value::Bool(true));
                }
            }
            if actual as usize != expected_count {
                *ok = false;
                details.insert("witness_actual_mismatch".to_string(), Value::Bool(true));
            }
            let expected_omitted = expected_count.saturating_sub(witness_keys.len());
            if omitted_count as usize != expected_omitted {
                *ok = false;
                details.insert(
                    "witness_omitted_count_mismatch".to_string(),
                    Value::Bool(true),
                );
            }
            let omitted_ids: Vec<&String> = expected_ids
                .iter()
                .filter(|id| !witness_keys.contains(*id))
                .collect();
            let mut expected_sample: Vec<String> = Vec::new();
            if let Some(first) = omitted_ids.first() {
                expected_sample.push((*first).clone());
                if omitted_ids.len() > 1 {
                    expected_sample.push((*omitted_ids[omitted_ids.len() - 1]).clone());
                }
            }
            let expected_sample_value = serde_json::json!(expected_sample);
            if omission.get("sample_ids") != Some(&expected_sample_value) {
                *ok = false;
                details.insert("witness_sample_mismatch".to_string(), Value::Bool(true));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::diff_all_details;
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

    fn report_and_inputs() -> (Value, MappingSpec, MappingSpec) {
        let v1 = spec(chain());
        let mut raw = chain();
        raw["derived"][0]["type"] = json!("int");
        let v2 = spec(raw);
        let report = diff_all_details(
            &DiffInputs {
                spec_v1: &v1,
                spec_v2: &v2,
                registry_v1: None,
                registry_v2: None,
                bindings_v2: None,
            },
            None,
            None,
        )
        .unwrap();
        (report, v1, v2)
    }

    fn doctor_inputs<'a>(v1: &'a MappingSpec, v2: &'a MappingSpec) -> DoctorInputs<'a> {
        DoctorInputs {
            spec_v1: v1,
            spec_v2: v2,
            registry_v1: None,
            registry_v2: None,
            bindings_v2: None,
            raw_schema: None,
        }
    }

    #[test]
    fn untampered_report_passes_every_clause() {
        let (report, v1, v2) = report_and_inputs();
        for mode in [DoctorMode::Sample, DoctorMode::Strict] {
            let verdict = run_doctor(&report, &doctor_inputs(&v1, &v2), mode);
            assert!(verdict.ok, "clauses: {:?}", verdict.clauses);
            assert_eq!(verdict.clauses.len(), 5);
            assert_eq!(verdict.summary["failed_clauses"], json!(0));
        }
    }

    #[test]
    fn tampered_predecessor_fails_only_witness_clause() {
        let (mut report, v1, v2) = report_and_inputs();
        // s:X is not an edge into d:B; only the witness clause notices.
        report["details"]["witnesses"]["d:B"]["predecessor"] = json!("s:X");
        let verdict = run_doctor(&report, &doctor_inputs(&v1, &v2), DoctorMode::Strict);
        assert!(!verdict.ok);
        let failed: Vec<&str> = verdict
            .clauses
            .iter()
            .filter(|c| !c.ok)
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(failed, vec!["witness_invariants"]);
    }

    #[test]
    fn tampered_witness_reason_detected() {
        let (mut report, v1, v2) = report_and_inputs();
        report["details"]["witnesses"]["d:A"]["reason"] = json!("TRANSITIVE_DEPENDENCY");
        let verdict = run_doctor(&report, &doctor_inputs(&v1, &v2), DoctorMode::Strict);
        let witness_clause = verdict
            .clauses
            .iter()
            .find(|c| c.id == "witness_invariants")
            .unwrap();
        assert!(!witness_clause.ok);
        assert!(witness_clause.details.contains_key("reason_mismatch"));
    }

    #[test]
    fn tampered_distance_detected() {
        let (mut report, v1, v2) = report_and_inputs();
        report["details"]["witnesses"]["d:A"]["distance"] = json!(3);
        let verdict = run_doctor(&report, &doctor_inputs(&v1, &v2), DoctorMode::Sample);
        let witness_clause = verdict
            .clauses
            .iter()
            .find(|c| c.id == "witness_invariants")
            .unwrap();
        assert!(!witness_clause.ok);
        assert!(witness_clause
            .details
            .contains_key("distance_failed_ids_sample"));
    }

    #[test]
    fn tampered_core_digest_detected() {
        let (mut report, v1, v2) = report_and_inputs();
        report["core_digest"] = json!(format!("sha256:{}", "0".repeat(64)));
        let verdict = run_doctor(&report, &doctor_inputs(&v1, &v2), DoctorMode::Sample);
        let failed: Vec<&str> = verdict
            .clauses
            .iter()
            .filter(|c| !c.ok)
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(failed, vec!["core_digest"]);
    }

    #[test]
    fn tampered_input_digest_detected() {
        let (mut report, v1, v2) = report_and_inputs();
        report["inputs"]["spec_v1"]["digest"] = json!(format!("sha256:{}", "1".repeat(64)));
        let verdict = run_doctor(&report, &doctor_inputs(&v1, &v2), DoctorMode::Sample);
        let inputs_clause = verdict
            .clauses
            .iter()
            .find(|c| c.id == "inputs_digest")
            .unwrap();
        assert!(!inputs_clause.ok);
        assert!(inputs_clause.details.contains_key("spec_v1"));
    }

    #[test]
    fn tampered_summary_fails_accounting() {
        let (mut report, v1, v2) = report_and_inputs();
        report["details"]["summaries"]["max_distance"] = json!(99);
        let verdict = run_doctor(&report, &doctor_inputs(&v1, &v2), DoctorMode::Sample);
        let failed: Vec<&str> = verdict
            .clauses
            .iter()
            .filter(|c| !c.ok)
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(failed, vec!["accounting_invariants"]);
    }

    #[test]
    fn wrong_header_detected() {
        let (mut report, v1, v2) = report_and_inputs();
        report["report_schema_version"] = json!("9.9");
        let verdict = run_doctor(&report, &doctor_inputs(&v1, &v2), DoctorMode::Sample);
        let header = verdict
            .clauses
            .iter()
            .find(|c| c.id == "header_contract")
            .unwrap();
        assert!(!header.ok);
        assert_eq!(header.details["report_schema_version"], json!("9.9"));
    }
}
