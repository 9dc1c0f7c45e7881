//! Mapping specification model with strict parse-time validation.
//!
//! Identity is carried by typed id prefixes: `s:` source, `d:` derived
//! (`v:` in run-bundle adapters), `c:` constraint, `t:` transform. Renaming
//! the human-readable `name` while keeping the id is non-impacting.
//!
//! Input lists are canonicalized at parse into a sorted, duplicate-free
//! sequence, which makes input reorders invisible to the diff. `params` is
//! pure JSON (floats banned) with a 50 KB hard limit on the canonical form;
//! `params_hash` is computed at load time and never read from the document.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::canonical::canonical_dumps;
use crate::hash::hash_params;

/// Hard limit on canonical params bytes. Crossing it aborts the parse.
pub const PARAMS_MAX_BYTES: usize = 50_000;
/// Advisory limit; crossing it yields a `PARAMS_LARGE` warning in validate.
pub const PARAMS_ADVISORY_BYTES: usize = 10_000;

/// A source column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceColumn {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// A derived variable definition. `params_hash` is a computed field: it is
/// present when serializing the normalized model but never accepted from
/// the source document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedVariable {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub variable_type: String,
    pub transform_ref: String,
    pub inputs: Vec<String>,
    pub params: Option<Map<String, Value>>,
    pub notes: Option<String>,
    pub params_hash: String,
}

#[derive(Deserialize)]
struct DerivedVariableRaw {
    id: String,
    name: String,
    #[serde(rename = "type")]
    variable_type: String,
    transform_ref: String,
    inputs: Vec<String>,
    #[serde(default)]
    params: Option<Map<String, Value>>,
    #[serde(default)]
    notes: Option<String>,
}

impl<'de> Deserialize<'de> for DerivedVariable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = DerivedVariableRaw::deserialize(deserializer)?;
        DerivedVariable::new(
            raw.id,
            raw.name,
            raw.variable_type,
            raw.transform_ref,
            raw.inputs,
            raw.params,
            raw.notes,
        )
        .map_err(serde::de::Error::custom)
    }
}

impl DerivedVariable {
    pub fn new(
        id: String,
        name: String,
        variable_type: String,
        transform_ref: String,
        inputs: Vec<String>,
        params: Option<Map<String, Value>>,
        notes: Option<String>,
    ) -> Result<Self, String> {
        if !transform_ref.starts_with("t:") {
            return Err(format!(
                "transform reference '{transform_ref}' must start with 't:' (e.g. 't:ct_map')"
            ));
        }
        let inputs = canonicalize_inputs(inputs)?;
        let params = validate_params(params)?;
        let params_hash = hash_params(params.as_ref()).map_err(|e| e.to_string())?;
        Ok(Self {
            id,
            name,
            variable_type,
            transform_ref,
            inputs,
            params,
            notes,
            params_hash,
        })
    }
}

/// A constraint node: a derived node with a boolean output. Constraints
/// fall into the same graph, the same diff, the same impact logic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintNode {
    pub id: String,
    pub name: String,
    pub inputs: Vec<String>,
    pub expression: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
struct ConstraintNodeRaw {
    id: String,
    name: String,
    inputs: Vec<String>,
    #[serde(default)]
    expression: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

impl<'de> Deserialize<'de> for ConstraintNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = ConstraintNodeRaw::deserialize(deserializer)?;
        ConstraintNode::new(raw.id, raw.name, raw.inputs, raw.expression, raw.notes)
            .map_err(serde::de::Error::custom)
    }
}

impl ConstraintNode {
    pub fn new(
        id: String,
        name: String,
        inputs: Vec<String>,
        expression: Option<String>,
        notes: Option<String>,
    ) -> Result<Self, String> {
        if !id.starts_with("c:") {
            return Err(format!(
                "constraint id '{id}' must start with 'c:' (e.g. 'c:AGE_GE_0')"
            ));
        }
        let inputs = canonicalize_inputs(inputs)?;
        Ok(Self {
            id,
            name,
            inputs,
            expression,
            notes,
        })
    }
}

/// Validate and canonicalize input references: prefix check, duplicate
/// rejection, lexicographic sort. Canonical order makes the sequence
/// order-agnostic.
fn canonicalize_inputs(inputs: Vec<String>) -> Result<Vec<String>, String> {
    for input in &inputs {
        let valid = input.starts_with("s:")
            || input.starts_with("d:")
            || input.starts_with("v:")
            || input.starts_with("c:");
        if !valid {
            return Err(format!(
                "input '{input}' must start with 's:' (source), 'd:' (derived), 'v:' (vars), or 'c:' (constraint)"
            ));
        }
    }
    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for input in &inputs {
        if !seen.insert(input.clone()) {
            duplicates.insert(input.clone());
        }
    }
    if !duplicates.is_empty() {
        let dup_list = duplicates.into_iter().collect::<Vec<_>>().join(", ");
        return Err(format!("duplicate inputs not allowed: {dup_list}"));
    }
    let mut sorted = inputs;
    sorted.sort();
    Ok(sorted)
}

/// Params discipline: pure JSON (floats rejected by canonicalization) and
/// small (hard limit on the canonical form, measured deterministically).
fn validate_params(
    params: Option<Map<String, Value>>,
) -> Result<Option<Map<String, Value>>, String> {
    let Some(map) = params else {
        return Ok(None);
    };
    let canonical =
        canonical_dumps(&Value::Object(map.clone())).map_err(|e| format!("invalid params: {e}"))?;
    if canonical.len() > PARAMS_MAX_BYTES {
        return Err(format!(
            "params exceed size limit (50KB): got {} bytes of canonical JSON",
            canonical.len()
        ));
    }
    Ok(Some(map))
}

/// A mapping specification. Unknown top-level fields are rejected; `review`
/// is non-impacting metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingSpec {
    pub spec_version: String,
    pub study_id: String,
    pub source_table: String,
    pub sources: Vec<SourceColumn>,
    pub derived: Vec<DerivedVariable>,
    #[serde(default)]
    pub constraints: Vec<ConstraintNode>,
    #[serde(default)]
    pub review: Option<Map<String, Value>>,
}

impl MappingSpec {
    pub fn source_ids(&self) -> BTreeSet<String> {
        self.sources.iter().map(|s| s.id.clone()).collect()
    }

    pub fn derived_ids(&self) -> BTreeSet<String> {
        self.derived.iter().map(|d| d.id.clone()).collect()
    }

    pub fn constraint_ids(&self) -> BTreeSet<String> {
        self.constraints.iter().map(|c| c.id.clone()).collect()
    }

    /// All ids: sources ∪ derived ∪ constraints.
    pub fn all_ids(&self) -> BTreeSet<String> {
        let mut ids = self.source_ids();
        ids.extend(self.derived_ids());
        ids.extend(self.constraint_ids());
        ids
    }

    pub fn source_by_id(&self, id: &str) -> Option<&SourceColumn> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn derived_by_id(&self, id: &str) -> Option<&DerivedVariable> {
        self.derived.iter().find(|d| d.id == id)
    }

    pub fn constraint_by_id(&self, id: &str) -> Option<&ConstraintNode> {
        self.constraints.iter().find(|c| c.id == id)
    }

    /// The normalized model as a JSON value (computed fields included);
    /// this is what input digests are taken over.
    pub fn to_value(&self) -> crate::CheshbonResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| crate::CheshbonError::serialization(format!("failed to serialize spec: {e}")))
    }
}
