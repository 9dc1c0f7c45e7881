//! Public operations: diff, all-details diff, and validation.
//!
//! These functions are pure: they accept parsed inputs and return complete,
//! structured results. File loading, exit codes, and rendering live in
//! frontends. Registry arguments are bound together; providing only one
//! side is a construction error.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::binding_impact::compute_binding_impact;
use crate::canonical::canonical_dumps;
use crate::diff::{diff_registries, diff_specs, sort_events, validate_transform_refs, ChangeEvent};
use crate::errors::{CheshbonError, CheshbonResult};
use crate::graph::DependencyGraph;
use crate::impact::{compute_impact, ImpactReason, ImpactResult};
use crate::model::bindings::{
    check_ambiguous_bindings, check_missing_bindings, validate_bindings, Bindings, RawSchema,
};
use crate::model::compat::parse_spec;
use crate::model::registry::TransformRegistry;
use crate::model::spec::{MappingSpec, PARAMS_ADVISORY_BYTES};
use crate::report::contract::ReportCaps;

/// How much detail the diff carries. `Core` suppresses dependency paths and
/// alternative-path counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    Full,
    Core,
}

/// Parsed inputs for one diff request. The request owns no I/O; everything
/// arrives already validated.
#[derive(Debug, Clone, Copy)]
pub struct DiffInputs<'a> {
    pub spec_v1: &'a MappingSpec,
    pub spec_v2: &'a MappingSpec,
    pub registry_v1: Option<&'a TransformRegistry>,
    pub registry_v2: Option<&'a TransformRegistry>,
    /// Bindings are evaluated against the `to` spec.
    pub bindings_v2: Option<&'a Bindings>,
}

/// Stable result model for diff analysis. All maps are ordered, so the
/// serialized form is deterministic.
#[derive(Debug, Clone, Serialize)]
pub struct DiffResult {
    pub validation_failed: bool,
    pub validation_errors: Vec<String>,
    pub change_summary: BTreeMap<String, u64>,
    pub impacted_ids: Vec<String>,
    pub unaffected_ids: Vec<String>,
    pub reasons: BTreeMap<String, ImpactReason>,
    pub paths: BTreeMap<String, Vec<String>>,
    pub missing_inputs: BTreeMap<String, Vec<String>>,
    pub missing_bindings: BTreeMap<String, Vec<String>>,
    pub ambiguous_bindings: BTreeMap<String, Vec<String>>,
    pub missing_transform_refs: BTreeMap<String, Vec<String>>,
    pub alternative_path_counts: BTreeMap<String, u32>,
    pub events: Vec<ChangeEvent>,
    /// Per-variable missing/ambiguous source ids, populated only when
    /// bindings were provided.
    pub binding_issues: BTreeMap<String, Vec<String>>,
}

/// Outcome class of a diff run, with the CLI exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NoImpact,
    Impacted,
    NonExecutable,
}

impl RunStatus {
    pub fn of(result: &DiffResult) -> Self {
        if result.validation_failed {
            Self::NonExecutable
        } else if !result.impacted_ids.is_empty() {
            Self::Impacted
        } else {
            Self::NoImpact
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoImpact => "no_impact",
            Self::Impacted => "impacted",
            Self::NonExecutable => "non_executable",
        }
    }

    /// 0 = no impact; 1 = impacted; 2 = non-executable.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoImpact => 0,
            Self::Impacted => 1,
            Self::NonExecutable => 2,
        }
    }
}

/// Intermediate artifacts of one diff request, kept for report builders.
pub(crate) struct DiffComputation {
    pub graph_v1: DependencyGraph,
    pub graph_v2: DependencyGraph,
    #[allow(dead_code)]
    pub impact: ImpactResult,
    pub result: DiffResult,
}

pub(crate) fn diff_internal(
    inputs: &DiffInputs,
    detail_level: DetailLevel,
) -> CheshbonResult<DiffComputation> {
    if inputs.registry_v1.is_some() != inputs.registry_v2.is_some() {
        return Err(CheshbonError::invalid_argument(
            "both registry_v1 and registry_v2 must be provided together, or neither",
        ));
    }

    let graph_v1 = DependencyGraph::build(inputs.spec_v1)?;
    let graph_v2 = DependencyGraph::build(inputs.spec_v2)?;

    // Transform-ref validation collects errors without stopping; the run is
    // marked non-executable but impact analysis continues.
    let mut extra_errors: Vec<String> = Vec::new();
    if let Some(registry_v2) = inputs.registry_v2 {
        extra_errors.extend(validate_transform_refs(inputs.spec_v2, registry_v2));
        if let Some(registry_v1) = inputs.registry_v1 {
            extra_errors.extend(validate_transform_refs(inputs.spec_v1, registry_v1));
        }
    }

    let mut events = diff_specs(inputs.spec_v1, inputs.spec_v2);
    if let (Some(r1), Some(r2)) = (inputs.registry_v1, inputs.registry_v2) {
        events.extend(diff_registries(r1, r2));
    }
    sort_events(&mut events);

    let compute_paths = detail_level == DetailLevel::Full;
    let mut impact = compute_impact(
        inputs.spec_v1,
        inputs.spec_v2,
        &graph_v1,
        &events,
        inputs.registry_v2,
        compute_paths,
    );

    if let Some(bindings) = inputs.bindings_v2 {
        impact = compute_binding_impact(
            inputs.spec_v2,
            bindings,
            &graph_v2,
            impact,
            compute_paths,
        );
    }

    let result = build_diff_result(
        events,
        &impact,
        inputs.bindings_v2.is_some(),
        extra_errors,
        detail_level,
    );

    Ok(DiffComputation {
        graph_v1,
        graph_v2,
        impact,
        result,
    })
}

fn sorted_lists(map: &BTreeMap<String, BTreeSet<String>>) -> BTreeMap<String, Vec<String>> {
    map.iter()
        .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
        .collect()
}

fn build_diff_result(
    events: Vec<ChangeEvent>,
    impact: &ImpactResult,
    bindings_provided: bool,
    extra_errors: Vec<String>,
    detail_level: DetailLevel,
) -> DiffResult {
    let mut change_summary: BTreeMap<String, u64> = BTreeMap::new();
    for event in &events {
        *change_summary
            .entry(event.change_type.as_str().to_string())
            .or_default() += 1;
    }

    let mut binding_issues: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if bindings_provided {
        for (var_id, sources) in impact.missing_bindings.iter().chain(&impact.ambiguous_bindings) {
            let entry = binding_issues.entry(var_id.clone()).or_default();
            entry.extend(sources.iter().cloned());
        }
        for ids in binding_issues.values_mut() {
            ids.sort();
            ids.dedup();
        }
    }

    let mut validation_errors = impact.validation_errors.clone();
    if !extra_errors.is_empty() {
        validation_errors.extend(extra_errors.iter().cloned());
        let deduped: BTreeSet<String> = validation_errors.drain(..).collect();
        validation_errors = deduped.into_iter().collect();
    }
    let validation_failed = impact.validation_failed || !extra_errors.is_empty();

    let full = detail_level == DetailLevel::Full;
    DiffResult {
        validation_failed,
        validation_errors,
        change_summary,
        impacted_ids: impact.impacted.iter().cloned().collect(),
        unaffected_ids: impact.unaffected.iter().cloned().collect(),
        reasons: impact.impact_reasons.clone(),
        paths: if full {
            impact.impact_paths.clone()
        } else {
            BTreeMap::new()
        },
        missing_inputs: sorted_lists(&impact.unresolved_references),
        missing_bindings: sorted_lists(&impact.missing_bindings),
        ambiguous_bindings: sorted_lists(&impact.ambiguous_bindings),
        missing_transform_refs: sorted_lists(&impact.missing_transform_refs),
        alternative_path_counts: if full {
            impact.alternative_path_counts.clone()
        } else {
            BTreeMap::new()
        },
        events,
        binding_issues,
    }
}

/// High-level diff analysis between two spec versions.
pub fn diff(inputs: &DiffInputs, detail_level: DetailLevel) -> CheshbonResult<DiffResult> {
    Ok(diff_internal(inputs, detail_level)?.result)
}

/// Build the machine-first all-details report (canonical-JSON-ready value).
pub fn diff_all_details(
    inputs: &DiffInputs,
    raw_schema: Option<&Value>,
    caps: Option<ReportCaps>,
) -> CheshbonResult<Value> {
    let computation = diff_internal(inputs, DetailLevel::Full)?;
    crate::report::all_details::build_all_details_report(
        &computation.result,
        inputs,
        raw_schema,
        &caps.unwrap_or_default(),
    )
}

/// Stable validation codes surfaced by [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    // Errors (blocking)
    InvalidStructure,
    DuplicateId,
    MissingInput,
    CycleDetected,
    MissingTransformRef,
    DependencyGraphError,
    RegistryLoadError,
    // Warnings (non-blocking)
    MissingBinding,
    AmbiguousBinding,
    InvalidRawColumn,
    BindingsLoadError,
    RawSchemaLoadError,
    ParamsLarge,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidStructure => "INVALID_STRUCTURE",
            Self::DuplicateId => "DUPLICATE_ID",
            Self::MissingInput => "MISSING_INPUT",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::MissingTransformRef => "MISSING_TRANSFORM_REF",
            Self::DependencyGraphError => "DEPENDENCY_GRAPH_ERROR",
            Self::RegistryLoadError => "REGISTRY_LOAD_ERROR",
            Self::MissingBinding => "MISSING_BINDING",
            Self::AmbiguousBinding => "AMBIGUOUS_BINDING",
            Self::InvalidRawColumn => "INVALID_RAW_COLUMN",
            Self::BindingsLoadError => "BINDINGS_LOAD_ERROR",
            Self::RawSchemaLoadError => "RAW_SCHEMA_LOAD_ERROR",
            Self::ParamsLarge => "PARAMS_LARGE",
        }
    }
}

/// A single validation issue (error or warning).
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub code: ValidationCode,
    pub message: String,
    pub element_id: Option<String>,
    pub missing_id: Option<String>,
    pub cycle_path: Option<Vec<String>>,
    pub raw_column: Option<String>,
}

impl ValidationIssue {
    fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            element_id: None,
            missing_id: None,
            cycle_path: None,
            raw_column: None,
        }
    }

    fn with_element(mut self, element_id: impl Into<String>) -> Self {
        self.element_id = Some(element_id.into());
        self
    }

    fn sort_key(&self) -> (&'static str, &str, &str, &str) {
        (
            self.code.as_str(),
            self.element_id.as_deref().unwrap_or(""),
            self.missing_id.as_deref().unwrap_or(""),
            self.raw_column.as_deref().unwrap_or(""),
        )
    }
}

/// Result of a validation/preflight check. Warnings never block.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

/// Pure validation of a single spec document against optional registry,
/// bindings, and raw schema. Performs the same checks the diff pipeline
/// relies on; read-only, no side effects.
pub fn validate(
    spec: &Value,
    registry: Option<&Value>,
    bindings: Option<&Value>,
    raw_schema: Option<&Value>,
) -> ValidationResult {
    let mut errors: Vec<ValidationIssue> = Vec::new();
    let mut warnings: Vec<ValidationIssue> = Vec::new();

    // 1. Structure (including duplicate-id detection at parse).
    let spec_obj = match parse_spec(spec) {
        Ok(parsed) => parsed.spec,
        Err(CheshbonError::DuplicateId { ids }) => {
            for id in ids {
                errors.push(
                    ValidationIssue::new(
                        ValidationCode::DuplicateId,
                        format!("duplicate id '{id}' found in spec"),
                    )
                    .with_element(id),
                );
            }
            return finish(errors, warnings);
        }
        Err(e) => {
            errors.push(ValidationIssue::new(
                ValidationCode::InvalidStructure,
                format!("failed to parse spec: {e}"),
            ));
            return finish(errors, warnings);
        }
    };

    // 1b. Params size advisory.
    for derived in &spec_obj.derived {
        let Some(params) = &derived.params else {
            continue;
        };
        // Params were already canonicalized at parse; a failure here is
        // unreachable.
        let Ok(canonical) = canonical_dumps(&Value::Object(params.clone())) else {
            continue;
        };
        if canonical.len() > PARAMS_ADVISORY_BYTES {
            warnings.push(
                ValidationIssue::new(
                    ValidationCode::ParamsLarge,
                    format!(
                        "params for derived variable '{}' are large ({} bytes); params should be small and schema-governed",
                        derived.id,
                        canonical.len()
                    ),
                )
                .with_element(derived.id.clone()),
            );
        }
    }

    // 2. Missing input references and cycles, via graph construction.
    match DependencyGraph::build(&spec_obj) {
        Ok(_) => {}
        Err(CheshbonError::MissingDependencies { missing }) => {
            for missing_id in missing {
                let element_id = spec_obj
                    .derived
                    .iter()
                    .find(|d| d.inputs.contains(&missing_id))
                    .map(|d| d.id.clone())
                    .or_else(|| {
                        spec_obj
                            .constraints
                            .iter()
                            .find(|c| c.inputs.contains(&missing_id))
                            .map(|c| c.id.clone())
                    });
                let mut issue = ValidationIssue::new(
                    ValidationCode::MissingInput,
                    format!("input reference '{missing_id}' not found in spec"),
                );
                issue.element_id = element_id;
                issue.missing_id = Some(missing_id);
                errors.push(issue);
            }
        }
        Err(CheshbonError::CycleDetected { cycle, edge_kinds }) => {
            let mut issue = ValidationIssue::new(
                ValidationCode::CycleDetected,
                CheshbonError::CycleDetected {
                    cycle: cycle.clone(),
                    edge_kinds,
                }
                .to_string(),
            );
            issue.cycle_path = Some(cycle);
            errors.push(issue);
        }
        Err(e) => {
            errors.push(ValidationIssue::new(
                ValidationCode::DependencyGraphError,
                format!("unexpected error building dependency graph: {e}"),
            ));
        }
    }

    // 3. Transform refs against the registry, when provided.
    if let Some(registry_value) = registry {
        match TransformRegistry::from_value(registry_value) {
            Ok(registry_obj) => {
                for derived in &spec_obj.derived {
                    if !registry_obj.has_transform(&derived.transform_ref) {
                        errors.push(
                            ValidationIssue::new(
                                ValidationCode::MissingTransformRef,
                                format!(
                                    "derived variable '{}' ({}) references missing transform '{}': transform not found in registry",
                                    derived.id, derived.name, derived.transform_ref
                                ),
                            )
                            .with_element(derived.id.clone()),
                        );
                    }
                }
            }
            Err(e) => {
                errors.push(ValidationIssue::new(
                    ValidationCode::RegistryLoadError,
                    format!("failed to load registry: {e}"),
                ));
            }
        }
    }

    // 4. Binding warnings, when bindings are provided.
    if let Some(bindings_value) = bindings {
        match Bindings::from_value(bindings_value) {
            Ok(bindings_obj) => {
                let raw_schema_obj = match raw_schema {
                    Some(raw_value) => {
                        match serde_json::from_value::<RawSchema>(raw_value.clone()) {
                            Ok(schema) => Some(schema),
                            Err(e) => {
                                warnings.push(ValidationIssue::new(
                                    ValidationCode::RawSchemaLoadError,
                                    format!(
                                        "failed to load raw_schema: {e}; binding validation skipped"
                                    ),
                                ));
                                None
                            }
                        }
                    }
                    None => None,
                };

                for (derived_id, missing_sources) in
                    check_missing_bindings(&spec_obj, &bindings_obj)
                {
                    for source_id in missing_sources {
                        warnings.push(
                            ValidationIssue::new(
                                ValidationCode::MissingBinding,
                                format!(
                                    "derived variable '{derived_id}' requires source '{source_id}' but no binding found"
                                ),
                            )
                            .with_element(source_id),
                        );
                    }
                }

                for (source_id, raw_columns) in check_ambiguous_bindings(&bindings_obj) {
                    warnings.push(
                        ValidationIssue::new(
                            ValidationCode::AmbiguousBinding,
                            format!(
                                "source id '{source_id}' is bound to multiple raw columns: {}",
                                raw_columns.join(", ")
                            ),
                        )
                        .with_element(source_id),
                    );
                }

                if let Some(schema) = raw_schema_obj {
                    let (events, _) = validate_bindings(&schema, &bindings_obj);
                    for event in events {
                        let reason = event
                            .details
                            .as_ref()
                            .and_then(|d| d.get("reason"))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| "raw column not found in schema".to_string());
                        let mut issue =
                            ValidationIssue::new(ValidationCode::InvalidRawColumn, reason);
                        issue.element_id = Some(event.element.clone());
                        issue.raw_column = event.old_value.clone();
                        warnings.push(issue);
                    }
                }
            }
            Err(e) => {
                warnings.push(ValidationIssue::new(
                    ValidationCode::BindingsLoadError,
                    format!("failed to load bindings: {e}; binding validation skipped"),
                ));
            }
        }
    }

    finish(errors, warnings)
}

fn finish(mut errors: Vec<ValidationIssue>, mut warnings: Vec<ValidationIssue>) -> ValidationResult {
    errors.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    warnings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    ValidationResult {
        ok: errors.is_empty(),
        errors,
        warnings,
    }
}
