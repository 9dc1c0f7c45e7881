//! Shared builders for all-details event and issue indexes.
//!
//! Events and issues are content-addressed with short digests over their
//! canonical form (`evt:<8-hex>`, `iss:<8-hex>`), so witnesses can link to
//! them and a verifier can recompute the links independently.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::api::DiffResult;
use crate::diff::ChangeEvent;
use crate::errors::CheshbonResult;
use crate::hash::short_digest;

/// Event index entries plus a lookup from element id to the (sorted) event
/// ids touching it.
pub struct EventIndex {
    pub entries: Vec<Value>,
    pub ids_by_element: BTreeMap<String, Vec<String>>,
}

pub fn build_event_index(events: &[ChangeEvent]) -> CheshbonResult<EventIndex> {
    let mut entries = Vec::with_capacity(events.len());
    let mut ids_by_element: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (seq, event) in events.iter().enumerate() {
        let event_value = event.to_value();
        let event_id = format!("evt:{}", short_digest(&event_value)?);

        let mut entry = Map::new();
        entry.insert("event_id".to_string(), Value::String(event_id.clone()));
        entry.insert("event_seq".to_string(), Value::from(seq as u64 + 1));
        if let Value::Object(fields) = event_value {
            for (key, value) in fields {
                entry.insert(key, value);
            }
        }
        entries.push(Value::Object(entry));

        if !event.element_id.is_empty() {
            ids_by_element
                .entry(event.element_id.clone())
                .or_default()
                .push(event_id);
        }
    }

    for ids in ids_by_element.values_mut() {
        ids.sort();
    }

    Ok(EventIndex {
        entries,
        ids_by_element,
    })
}

/// Issue index entries plus a lookup keyed by
/// `(issue_type, element_id, affected_id)`.
pub struct IssuesIndex {
    pub entries: Vec<Value>,
    pub id_map: BTreeMap<(String, String, String), String>,
}

pub fn build_issues_index(result: &DiffResult) -> CheshbonResult<IssuesIndex> {
    let mut index = IssuesIndex {
        entries: Vec::new(),
        id_map: BTreeMap::new(),
    };
    let mut seq: u64 = 0;

    let mut add_issue = |index: &mut IssuesIndex,
                         issue_type: &str,
                         element_id: &str,
                         affected_id: &str,
                         details: Map<String, Value>|
     -> CheshbonResult<()> {
        seq += 1;
        let mut core = Map::new();
        core.insert(
            "issue_type".to_string(),
            Value::String(issue_type.to_string()),
        );
        core.insert(
            "element_id".to_string(),
            Value::String(element_id.to_string()),
        );
        core.insert("details".to_string(), Value::Object(details));
        let issue_id = format!("iss:{}", short_digest(&Value::Object(core.clone()))?);

        let mut entry = Map::new();
        entry.insert("issue_id".to_string(), Value::String(issue_id.clone()));
        entry.insert("issue_seq".to_string(), Value::from(seq));
        for (key, value) in core {
            entry.insert(key, value);
        }
        index.entries.push(Value::Object(entry));
        index.id_map.insert(
            (
                issue_type.to_string(),
                element_id.to_string(),
                affected_id.to_string(),
            ),
            issue_id,
        );
        Ok(())
    };

    for (derived_id, source_ids) in &result.missing_bindings {
        for source_id in source_ids {
            let mut details = Map::new();
            details.insert("affected_id".to_string(), Value::String(derived_id.clone()));
            details.insert("source_id".to_string(), Value::String(source_id.clone()));
            add_issue(&mut index, "MISSING_BINDING", source_id, derived_id, details)?;
        }
    }

    for (derived_id, source_ids) in &result.ambiguous_bindings {
        for source_id in source_ids {
            let mut details = Map::new();
            details.insert("affected_id".to_string(), Value::String(derived_id.clone()));
            details.insert("source_id".to_string(), Value::String(source_id.clone()));
            add_issue(
                &mut index,
                "AMBIGUOUS_BINDING",
                source_id,
                derived_id,
                details,
            )?;
        }
    }

    for (derived_id, transform_ids) in &result.missing_transform_refs {
        for transform_id in transform_ids {
            let mut details = Map::new();
            details.insert("affected_id".to_string(), Value::String(derived_id.clone()));
            details.insert(
                "transform_ref".to_string(),
                Value::String(transform_id.clone()),
            );
            add_issue(
                &mut index,
                "MISSING_TRANSFORM_REF",
                transform_id,
                derived_id,
                details,
            )?;
        }
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeType;

    fn event(change_type: ChangeType, element_id: &str) -> ChangeEvent {
        ChangeEvent {
            change_type,
            element_id: element_id.to_string(),
            old_value: None,
            new_value: Some("X".to_string()),
            details: None,
        }
    }

    #[test]
    fn event_ids_are_stable_and_sequenced() {
        let events = vec![
            event(ChangeType::DerivedAdded, "d:A"),
            event(ChangeType::DerivedAdded, "d:B"),
        ];
        let index1 = build_event_index(&events).unwrap();
        let index2 = build_event_index(&events).unwrap();
        assert_eq!(index1.entries, index2.entries);
        assert_eq!(index1.entries[0]["event_seq"], 1);
        assert_eq!(index1.entries[1]["event_seq"], 2);
        let id = index1.entries[0]["event_id"].as_str().unwrap();
        assert!(id.starts_with("evt:"));
        assert_eq!(index1.ids_by_element["d:A"].len(), 1);
    }

    #[test]
    fn issue_index_covers_all_three_categories() {
        let mut result = crate::api::DiffResult {
            validation_failed: false,
            validation_errors: vec![],
            change_summary: Default::default(),
            impacted_ids: vec![],
            unaffected_ids: vec![],
            reasons: Default::default(),
            paths: Default::default(),
            missing_inputs: Default::default(),
            missing_bindings: Default::default(),
            ambiguous_bindings: Default::default(),
            missing_transform_refs: Default::default(),
            alternative_path_counts: Default::default(),
            events: vec![],
            binding_issues: Default::default(),
        };
        result
            .missing_bindings
            .insert("d:A".to_string(), vec!["s:X".to_string()]);
        result
            .ambiguous_bindings
            .insert("d:B".to_string(), vec!["s:Y".to_string()]);
        result
            .missing_transform_refs
            .insert("d:C".to_string(), vec!["t:gone".to_string()]);

        let index = build_issues_index(&result).unwrap();
        assert_eq!(index.entries.len(), 3);
        assert!(index.id_map.contains_key(&(
            "MISSING_BINDING".to_string(),
            "s:X".to_string(),
            "d:A".to_string()
        )));
        assert!(index.id_map.contains_key(&(
            "AMBIGUOUS_BINDING".to_string(),
            "s:Y".to_string(),
            "d:B".to_string()
        )));
        assert!(index.id_map.contains_key(&(
            "MISSING_TRANSFORM_REF".to_string(),
            "t:gone".to_string(),
            "d:C".to_string()
        )));
        let seqs: Vec<u64> = index
            .entries
            .iter()
            .map(|e| e["issue_seq"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
