//! Structural diff between two spec versions and two registry versions.
//!
//! The diff emits a closed, orthogonal ontology of change events:
//! - each atomic semantic change produces exactly one event kind
//! - renames (name only, id unchanged) never produce content events
//! - params are compared only under an unchanged `transform_ref`
//! - `TRANSFORM_IMPL_CHANGED` fires iff `impl_fingerprint.digest` differs;
//!   changes to `version`, `source`, `ref`, or `algo` alone are attached to
//!   `details` but never emit an event of their own
//! - input lists are canonicalized at parse, so reorders are invisible and
//!   the diff does no set arithmetic
//!
//! Events are sorted by `(element_id, priority_in_type, change_type,
//! old_value, new_value)`; the per-class priorities keep remove < add <
//! rename < content changes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::registry::TransformRegistry;
use crate::model::spec::MappingSpec;

/// The closed set of change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    SourceRemoved,
    SourceAdded,
    SourceRenamed,
    DerivedRemoved,
    DerivedAdded,
    DerivedRenamed,
    DerivedTransformRefChanged,
    DerivedTransformParamsChanged,
    DerivedTypeChanged,
    DerivedInputsChanged,
    ConstraintRemoved,
    ConstraintAdded,
    ConstraintRenamed,
    ConstraintInputsChanged,
    ConstraintExpressionChanged,
    TransformImplChanged,
    TransformAdded,
    TransformRemoved,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceRemoved => "SOURCE_REMOVED",
            Self::SourceAdded => "SOURCE_ADDED",
            Self::SourceRenamed => "SOURCE_RENAMED",
            Self::DerivedRemoved => "DERIVED_REMOVED",
            Self::DerivedAdded => "DERIVED_ADDED",
            Self::DerivedRenamed => "DERIVED_RENAMED",
            Self::DerivedTransformRefChanged => "DERIVED_TRANSFORM_REF_CHANGED",
            Self::DerivedTransformParamsChanged => "DERIVED_TRANSFORM_PARAMS_CHANGED",
            Self::DerivedTypeChanged => "DERIVED_TYPE_CHANGED",
            Self::DerivedInputsChanged => "DERIVED_INPUTS_CHANGED",
            Self::ConstraintRemoved => "CONSTRAINT_REMOVED",
            Self::ConstraintAdded => "CONSTRAINT_ADDED",
            Self::ConstraintRenamed => "CONSTRAINT_RENAMED",
            Self::ConstraintInputsChanged => "CONSTRAINT_INPUTS_CHANGED",
            Self::ConstraintExpressionChanged => "CONSTRAINT_EXPRESSION_CHANGED",
            Self::TransformImplChanged => "TRANSFORM_IMPL_CHANGED",
            Self::TransformAdded => "TRANSFORM_ADDED",
            Self::TransformRemoved => "TRANSFORM_REMOVED",
        }
    }

    /// Per-element ordering priority (lowest first) within one element id.
    pub fn priority_in_type(&self) -> u32 {
        match self {
            Self::SourceRemoved | Self::DerivedRemoved | Self::ConstraintRemoved
            | Self::TransformRemoved => 10,
            Self::SourceAdded | Self::DerivedAdded | Self::ConstraintAdded
            | Self::TransformAdded => 20,
            Self::SourceRenamed | Self::DerivedRenamed | Self::ConstraintRenamed
            | Self::TransformImplChanged => 30,
            Self::DerivedTransformRefChanged | Self::ConstraintInputsChanged => 40,
            Self::DerivedTransformParamsChanged | Self::ConstraintExpressionChanged => 50,
            Self::DerivedTypeChanged => 60,
            Self::DerivedInputsChanged => 70,
        }
    }

    pub fn is_registry_event(&self) -> bool {
        matches!(
            self,
            Self::TransformImplChanged | Self::TransformAdded | Self::TransformRemoved
        )
    }
}

/// A single change event between two versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub element_id: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub details: Option<Map<String, Value>>,
}

impl ChangeEvent {
    fn new(change_type: ChangeType, element_id: &str) -> Self {
        Self {
            change_type,
            element_id: element_id.to_string(),
            old_value: None,
            new_value: None,
            details: None,
        }
    }

    fn with_values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = Some(details);
        self
    }

    /// The event as a JSON value (null-preserving), used for event ids and
    /// the core-subset digest.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("change events are always JSON-representable")
    }
}

fn inputs_json(inputs: &[String]) -> String {
    serde_json::to_string(inputs).expect("string lists are always JSON-representable")
}

fn inputs_details(old: &[String], new: &[String]) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("old_inputs".to_string(), serde_json::json!(old));
    details.insert("new_inputs".to_string(), serde_json::json!(new));
    details
}

/// Compute the structural diff between two mapping specs. Identity is
/// tracked by stable id across versions.
pub fn diff_specs(spec_v1: &MappingSpec, spec_v2: &MappingSpec) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    let source_ids_v1 = spec_v1.source_ids();
    let source_ids_v2 = spec_v2.source_ids();
    let derived_ids_v1 = spec_v1.derived_ids();
    let derived_ids_v2 = spec_v2.derived_ids();
    let constraint_ids_v1 = spec_v1.constraint_ids();
    let constraint_ids_v2 = spec_v2.constraint_ids();

    for id in source_ids_v1.difference(&source_ids_v2) {
        let s1 = spec_v1.source_by_id(id).expect("id from source set");
        events.push(
            ChangeEvent::new(ChangeType::SourceRemoved, id)
                .with_values(Some(s1.name.clone()), None),
        );
    }
    for id in source_ids_v2.difference(&source_ids_v1) {
        let s2 = spec_v2.source_by_id(id).expect("id from source set");
        events.push(
            ChangeEvent::new(ChangeType::SourceAdded, id)
                .with_values(None, Some(s2.name.clone())),
        );
    }
    for id in source_ids_v1.intersection(&source_ids_v2) {
        let s1 = spec_v1.source_by_id(id).expect("id from source set");
        let s2 = spec_v2.source_by_id(id).expect("id from source set");
        if s1.name != s2.name {
            events.push(
                ChangeEvent::new(ChangeType::SourceRenamed, id)
                    .with_values(Some(s1.name.clone()), Some(s2.name.clone())),
            );
        }
    }

    for id in derived_ids_v1.difference(&derived_ids_v2) {
        let d1 = spec_v1.derived_by_id(id).expect("id from derived set");
        events.push(
            ChangeEvent::new(ChangeType::DerivedRemoved, id)
                .with_values(Some(d1.name.clone()), None),
        );
    }
    for id in derived_ids_v2.difference(&derived_ids_v1) {
        let d2 = spec_v2.derived_by_id(id).expect("id from derived set");
        events.push(
            ChangeEvent::new(ChangeType::DerivedAdded, id)
                .with_values(None, Some(d2.name.clone())),
        );
    }
    for id in derived_ids_v1.intersection(&derived_ids_v2) {
        let d1 = spec_v1.derived_by_id(id).expect("id from derived set");
        let d2 = spec_v2.derived_by_id(id).expect("id from derived set");

        if d1.name != d2.name {
            events.push(
                ChangeEvent::new(ChangeType::DerivedRenamed, id)
                    .with_values(Some(d1.name.clone()), Some(d2.name.clone())),
            );
        }

        if d1.transform_ref != d2.transform_ref {
            // Params are transform-scoped: when the ref changes, params_hash
            // is intentionally not compared.
            events.push(
                ChangeEvent::new(ChangeType::DerivedTransformRefChanged, id)
                    .with_values(Some(d1.transform_ref.clone()), Some(d2.transform_ref.clone())),
            );
        } else if d1.params_hash != d2.params_hash {
            let mut details = Map::new();
            details.insert(
                "transform_ref".to_string(),
                Value::String(d1.transform_ref.clone()),
            );
            events.push(
                ChangeEvent::new(ChangeType::DerivedTransformParamsChanged, id)
                    .with_values(Some(d1.params_hash.clone()), Some(d2.params_hash.clone()))
                    .with_details(details),
            );
        }

        if d1.variable_type != d2.variable_type {
            events.push(
                ChangeEvent::new(ChangeType::DerivedTypeChanged, id)
                    .with_values(Some(d1.variable_type.clone()), Some(d2.variable_type.clone())),
            );
        }

        // Inputs are canonicalized at parse, so direct comparison works and
        // reorders never trigger.
        if d1.inputs != d2.inputs {
            events.push(
                ChangeEvent::new(ChangeType::DerivedInputsChanged, id)
                    .with_values(Some(inputs_json(&d1.inputs)), Some(inputs_json(&d2.inputs)))
                    .with_details(inputs_details(&d1.inputs, &d2.inputs)),
            );
        }
    }

    for id in constraint_ids_v1.difference(&constraint_ids_v2) {
        let c1 = spec_v1.constraint_by_id(id).expect("id from constraint set");
        events.push(
            ChangeEvent::new(ChangeType::ConstraintRemoved, id)
                .with_values(Some(c1.name.clone()), None),
        );
    }
    for id in constraint_ids_v2.difference(&constraint_ids_v1) {
        let c2 = spec_v2.constraint_by_id(id).expect("id from constraint set");
        events.push(
            ChangeEvent::new(ChangeType::ConstraintAdded, id)
                .with_values(None, Some(c2.name.clone())),
        );
    }
    for id in constraint_ids_v1.intersection(&constraint_ids_v2) {
        let c1 = spec_v1.constraint_by_id(id).expect("id from constraint set");
        let c2 = spec_v2.constraint_by_id(id).expect("id from constraint set");

        if c1.name != c2.name {
            events.push(
                ChangeEvent::new(ChangeType::ConstraintRenamed, id)
                    .with_values(Some(c1.name.clone()), Some(c2.name.clone())),
            );
        }
        if c1.inputs != c2.inputs {
            events.push(
                ChangeEvent::new(ChangeType::ConstraintInputsChanged, id)
                    .with_values(Some(inputs_json(&c1.inputs)), Some(inputs_json(&c2.inputs)))
                    .with_details(inputs_details(&c1.inputs, &c2.inputs)),
            );
        }
        if c1.expression != c2.expression {
            events.push(
                ChangeEvent::new(ChangeType::ConstraintExpressionChanged, id).with_values(
                    Some(c1.expression.clone().unwrap_or_default()),
                    Some(c2.expression.clone().unwrap_or_default()),
                ),
            );
        }
    }

    events
}

/// Diff two transform registries. `version` is informational; only
/// `impl_fingerprint.digest` is authoritative for impl changes.
pub fn diff_registries(
    registry_v1: &TransformRegistry,
    registry_v2: &TransformRegistry,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    let ids_v1: std::collections::BTreeSet<&str> =
        registry_v1.transforms.iter().map(|t| t.id.as_str()).collect();
    let ids_v2: std::collections::BTreeSet<&str> =
        registry_v2.transforms.iter().map(|t| t.id.as_str()).collect();

    for id in ids_v2.difference(&ids_v1) {
        let t2 = registry_v2.get_transform(id).expect("id from registry set");
        let new_value = (!t2.version.is_empty()).then(|| t2.version.clone());
        events.push(ChangeEvent::new(ChangeType::TransformAdded, id).with_values(None, new_value));
    }

    for id in ids_v1.difference(&ids_v2) {
        let t1 = registry_v1.get_transform(id).expect("id from registry set");
        let old_value = (!t1.version.is_empty()).then(|| t1.version.clone());
        events
            .push(ChangeEvent::new(ChangeType::TransformRemoved, id).with_values(old_value, None));
    }

    for id in ids_v1.intersection(&ids_v2) {
        let t1 = registry_v1.get_transform(id).expect("id from registry set");
        let t2 = registry_v2.get_transform(id).expect("id from registry set");

        if t1.impl_fingerprint.digest != t2.impl_fingerprint.digest {
            let mut details = Map::new();
            details.insert(
                "old_source".to_string(),
                Value::String(t1.impl_fingerprint.source.as_str().to_string()),
            );
            details.insert(
                "new_source".to_string(),
                Value::String(t2.impl_fingerprint.source.as_str().to_string()),
            );
            details.insert(
                "old_ref".to_string(),
                Value::String(t1.impl_fingerprint.r#ref.clone()),
            );
            details.insert(
                "new_ref".to_string(),
                Value::String(t2.impl_fingerprint.r#ref.clone()),
            );
            if !t1.version.is_empty() {
                details.insert("old_version".to_string(), Value::String(t1.version.clone()));
            }
            if !t2.version.is_empty() {
                details.insert("new_version".to_string(), Value::String(t2.version.clone()));
            }
            events.push(
                ChangeEvent::new(ChangeType::TransformImplChanged, id)
                    .with_values(
                        Some(t1.impl_fingerprint.digest.clone()),
                        Some(t2.impl_fingerprint.digest.clone()),
                    )
                    .with_details(details),
            );
        }
    }

    events
}

/// Sort events into the canonical order. Impact output must not depend on
/// the order events were produced in; this sort is the contract.
pub fn sort_events(events: &mut [ChangeEvent]) {
    events.sort_by(|a, b| {
        (
            a.element_id.as_str(),
            a.change_type.priority_in_type(),
            a.change_type.as_str(),
            a.old_value.as_deref().unwrap_or(""),
            a.new_value.as_deref().unwrap_or(""),
        )
            .cmp(&(
                b.element_id.as_str(),
                b.change_type.priority_in_type(),
                b.change_type.as_str(),
                b.old_value.as_deref().unwrap_or(""),
                b.new_value.as_deref().unwrap_or(""),
            ))
    });
}

/// Check that every `transform_ref` in the spec exists in the registry.
/// Collects error messages without stopping; the run is marked
/// non-executable but impact analysis continues.
pub fn validate_transform_refs(spec: &MappingSpec, registry: &TransformRegistry) -> Vec<String> {
    let mut errors = Vec::new();
    for derived in &spec.derived {
        if !registry.has_transform(&derived.transform_ref) {
            errors.push(format!(
                "derived variable '{}' ({}) references missing transform '{}': transform not found in registry",
                derived.id, derived.name, derived.transform_ref
            ));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: Value) -> MappingSpec {
        serde_json::from_value(value).unwrap()
    }

    fn base_spec() -> Value {
        json!({
            "spec_version": "1",
            "study_id": "S1",
            "source_table": "DM",
            "sources": [{"id": "s:SUBJID", "name": "SUBJID", "type": "string"}],
            "derived": [{
                "id": "d:USUBJID", "name": "USUBJID", "type": "string",
                "transform_ref": "t:direct_copy", "inputs": ["s:SUBJID"]
            }]
        })
    }

    fn registry(entries: Vec<Value>) -> TransformRegistry {
        TransformRegistry::from_value(&json!({
            "registry_version": "1",
            "transforms": entries
        }))
        .unwrap()
    }

    fn transform(id: &str, version: &str, digest: char) -> Value {
        json!({
            "id": id,
            "version": version,
            "kind": "builtin",
            "signature": {"inputs": ["string"], "output": "string"},
            "impl_fingerprint": {
                "algo": "sha256", "source": "builtin",
                "ref": "builtin", "digest": digest.to_string().repeat(64)
            }
        })
    }

    #[test]
    fn identical_specs_produce_no_events() {
        let v1 = spec(base_spec());
        let v2 = spec(base_spec());
        assert!(diff_specs(&v1, &v2).is_empty());
    }

    #[test]
    fn rename_produces_exactly_one_event() {
        let v1 = spec(base_spec());
        let mut raw = base_spec();
        raw["derived"][0]["name"] = json!("SUBJECT_ID");
        let v2 = spec(raw);
        let events = diff_specs(&v1, &v2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change_type, ChangeType::DerivedRenamed);
        assert_eq!(events[0].old_value.as_deref(), Some("USUBJID"));
        assert_eq!(events[0].new_value.as_deref(), Some("SUBJECT_ID"));
    }

    #[test]
    fn input_reorder_is_invisible() {
        let mut raw = base_spec();
        raw["sources"] = json!([
            {"id": "s:A", "name": "A", "type": "string"},
            {"id": "s:B", "name": "B", "type": "string"}
        ]);
        raw["derived"][0]["inputs"] = json!(["s:A", "s:B"]);
        let v1 = spec(raw.clone());
        raw["derived"][0]["inputs"] = json!(["s:B", "s:A"]);
        let v2 = spec(raw);
        assert!(diff_specs(&v1, &v2).is_empty());
    }

    #[test]
    fn params_change_only_under_same_ref() {
        let mut raw = base_spec();
        raw["derived"][0]["params"] = json!({"k": "v1"});
        let v1 = spec(raw.clone());

        // Same ref, changed params: one params event.
        raw["derived"][0]["params"] = json!({"k": "v2"});
        let v2 = spec(raw.clone());
        let events = diff_specs(&v1, &v2);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].change_type,
            ChangeType::DerivedTransformParamsChanged
        );
        let details = events[0].details.as_ref().unwrap();
        assert_eq!(details["transform_ref"], json!("t:direct_copy"));

        // Changed ref and params: only the ref event fires.
        raw["derived"][0]["transform_ref"] = json!("t:other_copy");
        let v3 = spec(raw);
        let events = diff_specs(&v1, &v3);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].change_type,
            ChangeType::DerivedTransformRefChanged
        );
    }

    #[test]
    fn impl_change_fires_on_digest_only() {
        let r1 = registry(vec![transform("t:direct_copy", "1.0.0", 'a')]);

        // Version-only change: no events.
        let r2 = registry(vec![transform("t:direct_copy", "2.0.0", 'a')]);
        assert!(diff_registries(&r1, &r2).is_empty());

        // Digest change: one event with informational details.
        let r3 = registry(vec![transform("t:direct_copy", "2.0.0", 'b')]);
        let events = diff_registries(&r1, &r3);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change_type, ChangeType::TransformImplChanged);
        assert_eq!(events[0].old_value.as_deref(), Some(&"a".repeat(64)[..]));
        let details = events[0].details.as_ref().unwrap();
        assert_eq!(details["old_version"], json!("1.0.0"));
        assert_eq!(details["new_version"], json!("2.0.0"));
    }

    #[test]
    fn registry_add_remove_events() {
        let r1 = registry(vec![transform("t:a_copy", "1", 'a')]);
        let r2 = registry(vec![transform("t:b_copy", "1", 'b')]);
        let mut events = diff_registries(&r1, &r2);
        sort_events(&mut events);
        let kinds: Vec<ChangeType> = events.iter().map(|e| e.change_type).collect();
        assert_eq!(
            kinds,
            vec![ChangeType::TransformRemoved, ChangeType::TransformAdded]
        );
    }

    #[test]
    fn events_sorted_by_element_then_priority() {
        let mut events = vec![
            ChangeEvent::new(ChangeType::DerivedInputsChanged, "d:B"),
            ChangeEvent::new(ChangeType::DerivedRenamed, "d:B"),
            ChangeEvent::new(ChangeType::DerivedRemoved, "d:A"),
        ];
        sort_events(&mut events);
        assert_eq!(events[0].element_id, "d:A");
        assert_eq!(events[1].change_type, ChangeType::DerivedRenamed);
        assert_eq!(events[2].change_type, ChangeType::DerivedInputsChanged);
    }

    #[test]
    fn missing_transform_refs_collected() {
        let v1 = spec(base_spec());
        let reg = registry(vec![transform("t:other", "1", 'a')]);
        let errors = validate_transform_refs(&v1, &reg);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("t:direct_copy"));
    }
}
