//! Binding layer: connects raw extract columns to stable source ids.
//!
//! Bindings map raw column names to `s:` ids. Two failure modes are
//! derived here and overlaid on impact results by `crate::binding_impact`:
//! - missing: a derived variable requires a source id no raw column binds
//! - ambiguous: more than one raw column binds the same source id
//!
//! The raw schema is used only to validate that every bound raw column
//! actually exists in the extract.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{CheshbonError, CheshbonResult};
use crate::model::spec::MappingSpec;

/// A raw column from an extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// Raw schema snapshot from an extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSchema {
    pub table: String,
    pub columns: Vec<RawColumn>,
}

impl RawSchema {
    pub fn column_names(&self) -> BTreeSet<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Bindings from raw column names to stable source ids
/// (e.g. `"RFSTDT" -> "s:RFSTDTC"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bindings {
    pub table: String,
    pub bindings: BTreeMap<String, String>,
}

impl Bindings {
    pub fn from_value(value: &Value) -> CheshbonResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CheshbonError::invalid_argument(format!("invalid bindings: {e}")))
    }

    pub fn bound_source_ids(&self) -> BTreeSet<String> {
        self.bindings.values().cloned().collect()
    }

    /// First raw column (in sorted order) bound to a source id.
    pub fn raw_column_for_source(&self, source_id: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, bound)| bound.as_str() == source_id)
            .map(|(raw, _)| raw.as_str())
    }

    /// The bindings as a JSON value, for input digests.
    pub fn to_value(&self) -> CheshbonResult<Value> {
        serde_json::to_value(self).map_err(|e| {
            CheshbonError::serialization(format!("failed to serialize bindings: {e}"))
        })
    }
}

/// Binding-level change and validity events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BindingEventKind {
    RawColumnAdded,
    RawColumnRemoved,
    RawColumnRenamed,
    BindingAdded,
    BindingRemoved,
    BindingChanged,
    /// Binding references a raw column not present in the schema.
    BindingInvalid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingEvent {
    pub event_type: BindingEventKind,
    pub element: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub details: Option<Map<String, Value>>,
}

/// Validate bindings against a raw schema. Returns the invalidity events
/// plus the set of schema columns no binding maps (informational).
pub fn validate_bindings(
    schema: &RawSchema,
    bindings: &Bindings,
) -> (Vec<BindingEvent>, BTreeSet<String>) {
    let schema_columns = schema.column_names();
    let mut events = Vec::new();

    for (raw_col, source_id) in &bindings.bindings {
        if !schema_columns.contains(raw_col) {
            let mut details = Map::new();
            details.insert(
                "reason".to_string(),
                Value::String(format!("raw column '{raw_col}' not found in schema")),
            );
            events.push(BindingEvent {
                event_type: BindingEventKind::BindingInvalid,
                element: source_id.clone(),
                old_value: Some(raw_col.clone()),
                new_value: None,
                details: Some(details),
            });
        }
    }

    let bound_columns: BTreeSet<String> = bindings.bindings.keys().cloned().collect();
    let unmapped = schema_columns
        .difference(&bound_columns)
        .cloned()
        .collect();

    (events, unmapped)
}

/// Which source ids required by each derived variable are absent from the
/// bindings. Keyed by derived id.
pub fn check_missing_bindings(
    spec: &MappingSpec,
    bindings: &Bindings,
) -> BTreeMap<String, BTreeSet<String>> {
    let bound = bindings.bound_source_ids();
    let mut missing = BTreeMap::new();
    for derived in &spec.derived {
        let absent: BTreeSet<String> = derived
            .inputs
            .iter()
            .filter(|input| input.starts_with("s:") && !bound.contains(*input))
            .cloned()
            .collect();
        if !absent.is_empty() {
            missing.insert(derived.id.clone(), absent);
        }
    }
    missing
}

/// Source ids bound by more than one raw column. The raw column lists are
/// sorted for reproducible reporting.
pub fn check_ambiguous_bindings(bindings: &Bindings) -> BTreeMap<String, Vec<String>> {
    let mut by_source: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (raw_col, source_id) in &bindings.bindings {
        by_source
            .entry(source_id.clone())
            .or_default()
            .insert(raw_col.clone());
    }
    by_source
        .into_iter()
        .filter(|(_, cols)| cols.len() > 1)
        .map(|(source_id, cols)| (source_id, cols.into_iter().collect()))
        .collect()
}

/// Diff two binding versions into events: removals, additions, rebinds of a
/// raw column, and raw-column renames that keep the same source id.
pub fn diff_bindings(bindings_v1: &Bindings, bindings_v2: &Bindings) -> Vec<BindingEvent> {
    let mut events = Vec::new();
    let v1 = &bindings_v1.bindings;
    let v2 = &bindings_v2.bindings;

    for (raw_col, source_id) in v1 {
        if !v2.contains_key(raw_col) {
            events.push(BindingEvent {
                event_type: BindingEventKind::BindingRemoved,
                element: source_id.clone(),
                old_value: Some(raw_col.clone()),
                new_value: None,
                details: None,
            });
        }
    }

    for (raw_col, source_id) in v2 {
        if !v1.contains_key(raw_col) {
            events.push(BindingEvent {
                event_type: BindingEventKind::BindingAdded,
                element: source_id.clone(),
                old_value: None,
                new_value: Some(raw_col.clone()),
                details: None,
            });
        }
    }

    for (raw_col, source_v1) in v1 {
        let Some(source_v2) = v2.get(raw_col) else {
            continue;
        };
        if source_v1 != source_v2 {
            let mut details = Map::new();
            details.insert(
                "old_source_id".to_string(),
                Value::String(source_v1.clone()),
            );
            details.insert(
                "new_source_id".to_string(),
                Value::String(source_v2.clone()),
            );
            events.push(BindingEvent {
                event_type: BindingEventKind::BindingChanged,
                element: source_v1.clone(),
                old_value: Some(raw_col.clone()),
                new_value: Some(raw_col.clone()),
                details: Some(details),
            });
        }
    }

    // Same source id bound by a different raw column: a column rename with
    // the binding kept current.
    let v1_by_source: BTreeMap<&String, &String> = v1.iter().map(|(c, s)| (s, c)).collect();
    let v2_by_source: BTreeMap<&String, &String> = v2.iter().map(|(c, s)| (s, c)).collect();
    for (source_id, raw_v1) in &v1_by_source {
        let Some(raw_v2) = v2_by_source.get(source_id) else {
            continue;
        };
        if raw_v1 != raw_v2 {
            let mut details = Map::new();
            details.insert(
                "source_id".to_string(),
                Value::String((*source_id).clone()),
            );
            events.push(BindingEvent {
                event_type: BindingEventKind::RawColumnRenamed,
                element: (*source_id).clone(),
                old_value: Some((*raw_v1).clone()),
                new_value: Some((*raw_v2).clone()),
                details: Some(details),
            });
        }
    }

    events
}
