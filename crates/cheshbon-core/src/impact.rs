//! Impact analysis: which derived outputs are invalidated by a set of
//! change events.
//!
//! A derived variable is impacted when any of these hold:
//! 1. an input reference lost its identity (source/derived/constraint removed)
//! 2. its `transform_ref` changed
//! 3. its transform params changed (`params_hash`)
//! 4. its type changed
//! 5. its input list changed (adds/removes/substitutions)
//! 6. its transform's implementation digest changed (registry level)
//! 7. its transform was removed from the registry
//! 8. transitively: anything depending on an impacted node
//!
//! Everything else (names, notes, review metadata) is non-impacting.
//!
//! Concurrent causes resolve through a total reason-precedence lattice;
//! the output depends only on the lattice, canonical neighbor order, and
//! deterministic path search, never on the order events arrive in.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::diff::{ChangeEvent, ChangeType};
use crate::graph::DependencyGraph;
use crate::model::registry::TransformRegistry;
use crate::model::spec::MappingSpec;

/// Why a node is impacted. Ordered by precedence via [`ImpactReason::priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactReason {
    MissingTransformRef,
    DirectChangeMissingInput,
    MissingInput,
    DirectChange,
    TransformRemoved,
    TransformImplChanged,
    TransitiveDependency,
    // Assigned by the binding overlay, outside the base lattice.
    MissingBinding,
    AmbiguousBinding,
}

impl ImpactReason {
    /// Precedence: highest priority wins when multiple causes hit a node.
    pub fn priority(&self) -> u32 {
        match self {
            Self::MissingTransformRef => 100,
            Self::DirectChangeMissingInput => 90,
            Self::MissingInput => 85,
            Self::DirectChange => 80,
            Self::TransformRemoved => 75,
            Self::TransformImplChanged => 70,
            Self::TransitiveDependency => 10,
            Self::MissingBinding | Self::AmbiguousBinding => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingTransformRef => "MISSING_TRANSFORM_REF",
            Self::DirectChangeMissingInput => "DIRECT_CHANGE_MISSING_INPUT",
            Self::MissingInput => "MISSING_INPUT",
            Self::DirectChange => "DIRECT_CHANGE",
            Self::TransformRemoved => "TRANSFORM_REMOVED",
            Self::TransformImplChanged => "TRANSFORM_IMPL_CHANGED",
            Self::TransitiveDependency => "TRANSITIVE_DEPENDENCY",
            Self::MissingBinding => "MISSING_BINDING",
            Self::AmbiguousBinding => "AMBIGUOUS_BINDING",
        }
    }

    /// Reasons whose witness distance is pinned to zero (the node itself is
    /// the root cause).
    pub fn is_zero_distance(&self) -> bool {
        matches!(
            self,
            Self::DirectChange
                | Self::DirectChangeMissingInput
                | Self::TransformImplChanged
                | Self::TransformRemoved
                | Self::MissingTransformRef
        )
    }

    /// Reasons triggered by issues (not change events).
    pub fn is_issue_backed(&self) -> bool {
        matches!(
            self,
            Self::MissingBinding | Self::AmbiguousBinding | Self::MissingTransformRef
        )
    }
}

/// Result of impact analysis. All collections are keyed and ordered, so the
/// serialized form is canonical without further sorting.
#[derive(Debug, Clone, Default)]
pub struct ImpactResult {
    pub impacted: BTreeSet<String>,
    pub unaffected: BTreeSet<String>,
    /// Dependency path from a root cause to each impacted node.
    pub impact_paths: BTreeMap<String, Vec<String>>,
    pub impact_reasons: BTreeMap<String, ImpactReason>,
    /// Missing input ids per impacted node.
    pub unresolved_references: BTreeMap<String, BTreeSet<String>>,
    /// Populated by the binding overlay.
    pub missing_bindings: BTreeMap<String, BTreeSet<String>>,
    pub ambiguous_bindings: BTreeMap<String, BTreeSet<String>>,
    pub missing_transform_refs: BTreeMap<String, BTreeSet<String>>,
    /// Diamond diagnostic: bounded alternative-path counts.
    pub alternative_path_counts: BTreeMap<String, u32>,
    /// Set when the run is non-executable (missing transforms, ambiguous
    /// bindings); never set without at least one validation error.
    pub validation_failed: bool,
    pub validation_errors: Vec<String>,
}

struct Propagation<'a> {
    graph: &'a DependencyGraph,
    compute_paths: bool,
    reasons: BTreeMap<String, ImpactReason>,
    paths: BTreeMap<String, Vec<String>>,
}

impl Propagation<'_> {
    /// Apply a candidate reason under the precedence lattice; when the
    /// candidate wins and a source node is known, record the shortest
    /// dependency path from it.
    fn set_reason(&mut self, var_id: &str, reason: ImpactReason, path_from: Option<&str>) {
        if let Some(current) = self.reasons.get(var_id) {
            if reason.priority() <= current.priority() {
                return;
            }
        }
        self.reasons.insert(var_id.to_string(), reason);
        if !self.compute_paths {
            return;
        }
        match path_from {
            None => {
                self.paths
                    .insert(var_id.to_string(), vec![var_id.to_string()]);
            }
            Some(from) if from == var_id => {
                self.paths
                    .insert(var_id.to_string(), vec![var_id.to_string()]);
            }
            Some(from) => {
                if let Some(path) = self.graph.dependency_path(from, var_id) {
                    self.paths.insert(var_id.to_string(), path);
                }
            }
        }
    }
}

fn add_missing_ref(target: &mut BTreeMap<String, BTreeSet<String>>, var_id: &str, ref_id: &str) {
    target
        .entry(var_id.to_string())
        .or_default()
        .insert(ref_id.to_string());
}

/// Compute which derived outputs are impacted by the (sorted) change
/// events, against the v1 dependency graph.
pub fn compute_impact(
    spec_v1: &MappingSpec,
    spec_v2: &MappingSpec,
    graph_v1: &DependencyGraph,
    change_events: &[ChangeEvent],
    registry_v2: Option<&TransformRegistry>,
    compute_paths: bool,
) -> ImpactResult {
    let all_derived_ids = spec_v1.derived_ids();
    let all_constraint_ids = spec_v1.constraint_ids();

    // Missing-input detection for rewired inputs checks against v2 sources
    // and derived variables.
    let mut available_ids_v2 = spec_v2.source_ids();
    available_ids_v2.extend(spec_v2.derived_ids());

    let mut transform_ref_to_derived: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for derived in &spec_v1.derived {
        transform_ref_to_derived
            .entry(derived.transform_ref.clone())
            .or_default()
            .insert(derived.id.clone());
    }

    let mut impacted: BTreeSet<String> = BTreeSet::new();
    let mut unresolved_references: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut missing_transform_refs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut prop = Propagation {
        graph: graph_v1,
        compute_paths,
        reasons: BTreeMap::new(),
        paths: BTreeMap::new(),
    };

    let affected_derived = |node: &str| -> BTreeSet<String> {
        graph_v1
            .transitive_dependents(node)
            .intersection(&all_derived_ids)
            .cloned()
            .collect()
    };

    for event in change_events {
        let element_id = event.element_id.as_str();
        match event.change_type {
            ChangeType::SourceRemoved => {
                // Direct dependents lose an input; strictly downstream nodes
                // inherit transitively.
                for var_id in affected_derived(element_id) {
                    impacted.insert(var_id.clone());
                    if graph_v1.dependencies(&var_id).contains(element_id) {
                        prop.set_reason(&var_id, ImpactReason::MissingInput, Some(element_id));
                        add_missing_ref(&mut unresolved_references, &var_id, element_id);
                    } else {
                        prop.set_reason(
                            &var_id,
                            ImpactReason::TransitiveDependency,
                            Some(element_id),
                        );
                    }
                }
            }
            ChangeType::DerivedRemoved | ChangeType::ConstraintRemoved => {
                let known = match event.change_type {
                    ChangeType::DerivedRemoved => all_derived_ids.contains(element_id),
                    _ => all_constraint_ids.contains(element_id),
                };
                if !known {
                    continue;
                }
                for var_id in affected_derived(element_id) {
                    impacted.insert(var_id.clone());
                    if graph_v1.dependencies(&var_id).contains(element_id) {
                        prop.set_reason(&var_id, ImpactReason::MissingInput, Some(element_id));
                        add_missing_ref(&mut unresolved_references, &var_id, element_id);
                    } else {
                        prop.set_reason(
                            &var_id,
                            ImpactReason::TransitiveDependency,
                            Some(element_id),
                        );
                    }
                }
            }
            ChangeType::DerivedTransformRefChanged
            | ChangeType::DerivedTransformParamsChanged
            | ChangeType::DerivedTypeChanged => {
                if !all_derived_ids.contains(element_id) {
                    continue;
                }
                impacted.insert(element_id.to_string());
                prop.set_reason(element_id, ImpactReason::DirectChange, None);
                for dep_id in affected_derived(element_id) {
                    impacted.insert(dep_id.clone());
                    prop.set_reason(&dep_id, ImpactReason::TransitiveDependency, Some(element_id));
                }
            }
            ChangeType::DerivedInputsChanged => {
                if !all_derived_ids.contains(element_id) {
                    continue;
                }
                impacted.insert(element_id.to_string());
                prop.set_reason(element_id, ImpactReason::DirectChange, None);

                // A rewire that now references an id absent from v2 is a
                // stronger condition than a plain direct change.
                if let Some(d2) = spec_v2.derived_by_id(element_id) {
                    let missing: Vec<&String> = d2
                        .inputs
                        .iter()
                        .filter(|input| !available_ids_v2.contains(*input))
                        .collect();
                    if !missing.is_empty() {
                        for missing_id in &missing {
                            add_missing_ref(&mut unresolved_references, element_id, missing_id);
                        }
                        prop.set_reason(element_id, ImpactReason::DirectChangeMissingInput, None);
                    }
                }

                for dep_id in affected_derived(element_id) {
                    impacted.insert(dep_id.clone());
                    prop.set_reason(&dep_id, ImpactReason::TransitiveDependency, Some(element_id));
                }
            }
            ChangeType::ConstraintInputsChanged | ChangeType::ConstraintExpressionChanged => {
                if !all_constraint_ids.contains(element_id) {
                    continue;
                }
                for var_id in affected_derived(element_id) {
                    impacted.insert(var_id.clone());
                    prop.set_reason(&var_id, ImpactReason::TransitiveDependency, Some(element_id));
                }
            }
            ChangeType::TransformImplChanged | ChangeType::TransformRemoved => {
                let reason = if event.change_type == ChangeType::TransformRemoved {
                    ImpactReason::TransformRemoved
                } else {
                    ImpactReason::TransformImplChanged
                };
                let Some(users) = transform_ref_to_derived.get(element_id) else {
                    continue;
                };
                for var_id in users.intersection(&all_derived_ids) {
                    impacted.insert(var_id.clone());
                    prop.set_reason(var_id, reason, None);
                    for dep_id in affected_derived(var_id) {
                        impacted.insert(dep_id.clone());
                        prop.set_reason(
                            &dep_id,
                            ImpactReason::TransitiveDependency,
                            Some(var_id.as_str()),
                        );
                    }
                }
            }
            // Adds and renames never invalidate existing outputs.
            ChangeType::SourceAdded
            | ChangeType::SourceRenamed
            | ChangeType::DerivedAdded
            | ChangeType::DerivedRenamed
            | ChangeType::ConstraintAdded
            | ChangeType::ConstraintRenamed
            | ChangeType::TransformAdded => {}
        }
    }

    // Missing transform refs in v2 (when a registry is supplied): the node
    // is non-executable regardless of any other change, so the reason sits
    // at the top of the lattice and validation fails.
    let mut validation_errors: Vec<String> = Vec::new();
    let mut validation_failed = false;
    if let Some(registry) = registry_v2 {
        for derived in &spec_v2.derived {
            if !all_derived_ids.contains(&derived.id) {
                continue;
            }
            if !registry.has_transform(&derived.transform_ref) {
                validation_errors.push(format!(
                    "derived variable '{}' ({}) references missing transform '{}': transform not found in registry",
                    derived.id, derived.name, derived.transform_ref
                ));
                validation_failed = true;
                impacted.insert(derived.id.clone());
                prop.set_reason(&derived.id, ImpactReason::MissingTransformRef, None);
                add_missing_ref(&mut missing_transform_refs, &derived.id, &derived.transform_ref);
            }
        }
    }

    let unaffected: BTreeSet<String> = all_derived_ids.difference(&impacted).cloned().collect();

    let mut alternative_path_counts: BTreeMap<String, u32> = BTreeMap::new();
    if compute_paths {
        for (var_id, path) in &prop.paths {
            if path.len() > 1 {
                let count = graph_v1.count_alternative_paths(&path[0], &path[path.len() - 1]);
                if count > 0 {
                    alternative_path_counts.insert(var_id.clone(), count);
                }
            }
        }
    }

    ImpactResult {
        impacted,
        unaffected,
        impact_paths: prop.paths,
        impact_reasons: prop.reasons,
        unresolved_references,
        missing_bindings: BTreeMap::new(),
        ambiguous_bindings: BTreeMap::new(),
        missing_transform_refs,
        alternative_path_counts,
        validation_failed,
        validation_errors,
    }
}
