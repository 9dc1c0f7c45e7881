//! Structured explanation primitives (no rendering).
//!
//! Frontends render these however they like; the core only resolves ids to
//! their human-readable names along events and impact paths.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::diff::ChangeEvent;
use crate::impact::ImpactResult;
use crate::model::spec::MappingSpec;

#[derive(Debug, Clone, Serialize)]
pub struct ChangeExplanation {
    pub change_type: String,
    pub element_id: String,
    pub element_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub details: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingReference {
    pub ref_id: String,
    pub ref_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactExplanation {
    pub var_id: String,
    pub var_name: String,
    pub path_ids: Vec<String>,
    pub path_names: Vec<String>,
    pub reason: String,
    pub alternative_path_count: u32,
    pub missing_inputs: Vec<MissingReference>,
    pub missing_bindings: Vec<MissingReference>,
    pub ambiguous_bindings: Vec<MissingReference>,
    pub missing_transform_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactExplanationResult {
    pub impacted: Vec<ImpactExplanation>,
    /// (id, name) pairs, sorted by id.
    pub unaffected: Vec<(String, String)>,
}

fn resolve_name(spec: &MappingSpec, node_id: &str) -> Option<String> {
    if node_id.starts_with("s:") {
        spec.source_by_id(node_id).map(|s| s.name.clone())
    } else if node_id.starts_with("d:") {
        spec.derived_by_id(node_id).map(|d| d.name.clone())
    } else if node_id.starts_with("c:") {
        spec.constraint_by_id(node_id).map(|c| c.name.clone())
    } else {
        None
    }
}

fn resolve_name_either(
    spec_v1: &MappingSpec,
    spec_v2: &MappingSpec,
    node_id: &str,
) -> Option<String> {
    resolve_name(spec_v1, node_id).or_else(|| resolve_name(spec_v2, node_id))
}

/// Explain every change event with element names resolved from either
/// version.
pub fn explain_changes(
    change_events: &[ChangeEvent],
    spec_v1: &MappingSpec,
    spec_v2: &MappingSpec,
) -> Vec<ChangeExplanation> {
    change_events
        .iter()
        .map(|event| ChangeExplanation {
            change_type: event.change_type.as_str().to_string(),
            element_id: event.element_id.clone(),
            element_name: resolve_name_either(spec_v1, spec_v2, &event.element_id),
            old_value: event.old_value.clone(),
            new_value: event.new_value.clone(),
            details: event.details.clone(),
        })
        .collect()
}

/// Explain every impacted node: reason, resolved path, and missing sets.
pub fn explain_impact(
    impact_result: &ImpactResult,
    spec_v1: &MappingSpec,
) -> ImpactExplanationResult {
    let missing_refs = |map: &std::collections::BTreeMap<String, std::collections::BTreeSet<String>>,
                        var_id: &str| {
        map.get(var_id)
            .map(|ids| {
                ids.iter()
                    .map(|ref_id| MissingReference {
                        ref_id: ref_id.clone(),
                        ref_name: resolve_name(spec_v1, ref_id),
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let impacted = impact_result
        .impacted
        .iter()
        .map(|var_id| {
            let var_name = spec_v1
                .derived_by_id(var_id)
                .map(|d| d.name.clone())
                .unwrap_or_else(|| var_id.clone());
            let path_ids = impact_result
                .impact_paths
                .get(var_id)
                .cloned()
                .unwrap_or_else(|| vec![var_id.clone()]);
            let path_names = path_ids
                .iter()
                .map(|id| resolve_name(spec_v1, id).unwrap_or_else(|| id.clone()))
                .collect();
            ImpactExplanation {
                var_id: var_id.clone(),
                var_name,
                path_ids,
                path_names,
                reason: impact_result
                    .impact_reasons
                    .get(var_id)
                    .map(|r| r.as_str().to_string())
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                alternative_path_count: impact_result
                    .alternative_path_counts
                    .get(var_id)
                    .copied()
                    .unwrap_or(0),
                missing_inputs: missing_refs(&impact_result.unresolved_references, var_id),
                missing_bindings: missing_refs(&impact_result.missing_bindings, var_id),
                ambiguous_bindings: missing_refs(&impact_result.ambiguous_bindings, var_id),
                missing_transform_refs: impact_result
                    .missing_transform_refs
                    .get(var_id)
                    .map(|ids| ids.iter().cloned().collect())
                    .unwrap_or_default(),
            }
        })
        .collect();

    let unaffected = impact_result
        .unaffected
        .iter()
        .map(|var_id| {
            let name = spec_v1
                .derived_by_id(var_id)
                .map(|d| d.name.clone())
                .unwrap_or_else(|| var_id.clone());
            (var_id.clone(), name)
        })
        .collect();

    ImpactExplanationResult {
        impacted,
        unaffected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{diff_specs, sort_events};
    use crate::graph::DependencyGraph;
    use crate::impact::compute_impact;
    use serde_json::json;

    #[test]
    fn names_resolved_along_paths() {
        let v1: MappingSpec = serde_json::from_value(json!({
            "spec_version": "1", "study_id": "S1", "source_table": "DM",
            "sources": [{"id": "s:X", "name": "RAW_X", "type": "string"}],
            "derived": [
                {"id": "d:A", "name": "ALPHA", "type": "string",
                 "transform_ref": "t:copy", "inputs": ["s:X"]},
                {"id": "d:B", "name": "BETA", "type": "string",
                 "transform_ref": "t:copy", "inputs": ["d:A"]}
            ]
        }))
        .unwrap();
        let mut v2 = v1.clone();
        v2.derived[0] = serde_json::from_value(json!({
            "id": "d:A", "name": "ALPHA", "type": "int",
            "transform_ref": "t:copy", "inputs": ["s:X"]
        }))
        .unwrap();

        let graph = DependencyGraph::build(&v1).unwrap();
        let mut events = diff_specs(&v1, &v2);
        sort_events(&mut events);
        let impact = compute_impact(&v1, &v2, &graph, &events, None, true);

        let explained = explain_impact(&impact, &v1);
        let beta = explained
            .impacted
            .iter()
            .find(|e| e.var_id == "d:B")
            .unwrap();
        assert_eq!(beta.var_name, "BETA");
        assert_eq!(beta.path_names, vec!["ALPHA", "BETA"]);
        assert_eq!(beta.reason, "TRANSITIVE_DEPENDENCY");

        let changes = explain_changes(&events, &v1, &v2);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].element_name.as_deref(), Some("ALPHA"));
    }
}
