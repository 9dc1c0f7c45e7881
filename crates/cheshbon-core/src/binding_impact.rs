//! Binding-aware impact overlay: missing and ambiguous bindings.
//!
//! Missing bindings are warnings (the run can still be reasoned about);
//! ambiguous bindings are terminal (the engine cannot decide which raw
//! column feeds a source id, so `validation_failed` is set). Both propagate
//! transitively, but a binding-specific reason is only assigned to the
//! directly affected derived variable; strictly downstream nodes that have
//! no reason yet become `TRANSITIVE_DEPENDENCY`. Nodes already impacted by
//! the base analysis keep their reason.

use std::collections::BTreeSet;

use crate::graph::DependencyGraph;
use crate::impact::{ImpactReason, ImpactResult};
use crate::model::bindings::{check_ambiguous_bindings, check_missing_bindings, Bindings};
use crate::model::spec::MappingSpec;

/// Overlay binding failures on a base impact result. Returns the base
/// unchanged when there are no binding issues.
pub fn compute_binding_impact(
    spec: &MappingSpec,
    bindings: &Bindings,
    graph: &DependencyGraph,
    base_impact: ImpactResult,
    compute_paths: bool,
) -> ImpactResult {
    let missing_map = check_missing_bindings(spec, bindings);
    let ambiguous_map = check_ambiguous_bindings(bindings);

    if missing_map.is_empty() && ambiguous_map.is_empty() {
        return base_impact;
    }

    let mut result = base_impact;
    let all_derived_ids = spec.derived_ids();

    let propagate = |result: &mut ImpactResult, derived_id: &str| {
        let affected: BTreeSet<String> = graph
            .transitive_dependents(derived_id)
            .intersection(&all_derived_ids)
            .cloned()
            .collect();
        for dep_id in affected {
            let existing = result.impact_reasons.get(&dep_id);
            let binding_related = matches!(
                existing,
                Some(ImpactReason::MissingBinding) | Some(ImpactReason::AmbiguousBinding)
            );
            if !binding_related {
                if existing.is_none() {
                    result
                        .impact_reasons
                        .insert(dep_id.clone(), ImpactReason::TransitiveDependency);
                }
                result.impacted.insert(dep_id);
            }
        }
    };

    for (derived_id, missing_sources) in &missing_map {
        result.impacted.insert(derived_id.clone());
        result
            .impact_reasons
            .insert(derived_id.clone(), ImpactReason::MissingBinding);
        result
            .missing_bindings
            .insert(derived_id.clone(), missing_sources.clone());
        propagate(&mut result, derived_id);
    }

    // Ambiguity outranks missing within the overlay and is terminal.
    let ambiguous_source_ids: BTreeSet<String> = ambiguous_map.keys().cloned().collect();
    let mut has_ambiguous = false;
    for derived in &spec.derived {
        let hit: BTreeSet<String> = derived
            .inputs
            .iter()
            .filter(|input| input.starts_with("s:") && ambiguous_source_ids.contains(*input))
            .cloned()
            .collect();
        if hit.is_empty() {
            continue;
        }
        has_ambiguous = true;
        result.impacted.insert(derived.id.clone());
        result
            .impact_reasons
            .insert(derived.id.clone(), ImpactReason::AmbiguousBinding);
        result.ambiguous_bindings.insert(derived.id.clone(), hit);
        propagate(&mut result, &derived.id);
    }

    if has_ambiguous {
        result.validation_failed = true;
        for (source_id, raw_columns) in &ambiguous_map {
            result.validation_errors.push(format!(
                "ambiguous binding for source id '{source_id}': multiple raw columns map to the same source ({}); cannot determine which to use",
                raw_columns.join(", ")
            ));
        }
    }

    // Keep the witness total: paths and alternative-path counts for every
    // node the overlay touched.
    if compute_paths {
        let overlay_roots: Vec<String> = missing_map
            .keys()
            .chain(result.ambiguous_bindings.keys())
            .cloned()
            .collect();
        for derived_id in overlay_roots {
            result
                .impact_paths
                .entry(derived_id.clone())
                .or_insert_with(|| vec![derived_id.clone()]);

            let affected: BTreeSet<String> = graph
                .transitive_dependents(&derived_id)
                .intersection(&all_derived_ids)
                .cloned()
                .collect();
            for dep_id in affected {
                if !result.impact_paths.contains_key(&dep_id) {
                    if let Some(path) = graph.dependency_path(&derived_id, &dep_id) {
                        result.impact_paths.insert(dep_id, path);
                    }
                }
            }
        }

        for (var_id, path) in &result.impact_paths {
            if path.len() > 1 && !result.alternative_path_counts.contains_key(var_id) {
                let count = graph.count_alternative_paths(&path[0], &path[path.len() - 1]);
                if count > 0 {
                    result.alternative_path_counts.insert(var_id.clone(), count);
                }
            }
        }
    }

    result.unaffected = result
        .unaffected
        .difference(&result.impacted)
        .cloned()
        .collect();

    result
}
