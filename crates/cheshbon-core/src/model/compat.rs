//! Schema-version compatibility for mapping-spec documents (0.6 legacy, 0.7).
//!
//! Parsers accept both versions. A missing `schema_version` is treated as
//! 0.6 with a warning and normalized in memory to 0.7. Legacy documents may
//! carry unknown top-level fields (ignored with a warning); 0.7 documents
//! reject them. Stored bytes are never rewritten.

use serde_json::{Map, Value};

use crate::errors::{CheshbonError, CheshbonResult};
use crate::model::spec::MappingSpec;
use crate::{SPEC_SCHEMA_VERSION, SPEC_SCHEMA_VERSION_LEGACY};

const KNOWN_FIELDS: [&str; 7] = [
    "spec_version",
    "study_id",
    "source_table",
    "sources",
    "derived",
    "constraints",
    "review",
];

/// Result of parsing a spec document through the compatibility layer.
/// `schema_version` is the normalized in-memory version, not what the
/// document carried.
#[derive(Debug, Clone)]
pub struct ParsedSpec {
    pub spec: MappingSpec,
    pub schema_version: String,
    pub warnings: Vec<String>,
}

/// Parse a raw spec document, applying version compatibility, structural
/// validation, and duplicate-id detection (in that order).
pub fn parse_spec(value: &Value) -> CheshbonResult<ParsedSpec> {
    let obj = value
        .as_object()
        .ok_or_else(|| CheshbonError::invalid_argument("spec document must be a JSON object"))?;

    let mut warnings = Vec::new();

    let legacy = match obj.get("schema_version").and_then(Value::as_str) {
        None if obj.contains_key("schema_version") => {
            return Err(CheshbonError::invalid_argument(
                "schema_version must be a string",
            ));
        }
        None => {
            warnings.push(format!(
                "missing schema_version, treating as legacy {SPEC_SCHEMA_VERSION_LEGACY}"
            ));
            true
        }
        Some(v) if v == SPEC_SCHEMA_VERSION_LEGACY => true,
        Some(v) if v == SPEC_SCHEMA_VERSION => false,
        Some(other) => {
            return Err(CheshbonError::invalid_argument(format!(
                "unsupported schema_version: {other}"
            )));
        }
    };

    let unknown: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| *k != "schema_version" && !KNOWN_FIELDS.contains(k))
        .collect();
    if !unknown.is_empty() {
        if legacy {
            warnings.push(format!(
                "unknown top-level fields ignored in legacy spec: {}",
                unknown.join(", ")
            ));
        } else {
            return Err(CheshbonError::invalid_argument(format!(
                "unknown top-level fields in spec: {}",
                unknown.join(", ")
            )));
        }
    }

    let mut cleaned = Map::new();
    for field in KNOWN_FIELDS {
        if let Some(v) = obj.get(field) {
            cleaned.insert(field.to_string(), v.clone());
        }
    }

    let spec: MappingSpec = serde_json::from_value(Value::Object(cleaned))
        .map_err(|e| CheshbonError::invalid_argument(format!("invalid spec structure: {e}")))?;

    check_duplicate_ids(&spec)?;

    Ok(ParsedSpec {
        spec,
        schema_version: SPEC_SCHEMA_VERSION.to_string(),
        warnings,
    })
}

fn check_duplicate_ids(spec: &MappingSpec) -> CheshbonResult<()> {
    let mut seen = std::collections::BTreeSet::new();
    let mut duplicates = std::collections::BTreeSet::new();
    let all = spec
        .sources
        .iter()
        .map(|s| s.id.as_str())
        .chain(spec.derived.iter().map(|d| d.id.as_str()))
        .chain(spec.constraints.iter().map(|c| c.id.as_str()));
    for id in all {
        if !seen.insert(id) {
            duplicates.insert(id.to_string());
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(CheshbonError::DuplicateId {
            ids: duplicates.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn minimal_spec() -> Value {
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

    #[test]
    fn missing_schema_version_warns_and_normalizes() {
        let parsed = parse_spec(&minimal_spec()).unwrap();
        assert_eq!(parsed.schema_version, "0.7");
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].contains("legacy 0.6"));
    }

    #[test]
    fn explicit_versions_accepted() {
        for version in ["0.6", "0.7"] {
            let mut v = minimal_spec();
            v["schema_version"] = json!(version);
            let parsed = parse_spec(&v).unwrap();
            assert_eq!(parsed.schema_version, "0.7");
        }
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut v = minimal_spec();
        v["schema_version"] = json!("0.9");
        let err = parse_spec(&v).unwrap_err();
        assert!(err.to_string().contains("unsupported schema_version"));
    }

    #[test]
    fn unknown_field_rejected_in_v07() {
        let mut v = minimal_spec();
        v["schema_version"] = json!("0.7");
        v["mystery"] = json!(1);
        let err = parse_spec(&v).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn unknown_field_warned_in_legacy() {
        let mut v = minimal_spec();
        v["mystery"] = json!(1);
        let parsed = parse_spec(&v).unwrap();
        assert!(parsed.warnings.iter().any(|w| w.contains("mystery")));
    }

    #[test]
    fn legacy_and_v07_digest_identically() {
        use crate::hash::sha256_canonical;
        let legacy = parse_spec(&minimal_spec()).unwrap();
        let mut tagged = minimal_spec();
        tagged["schema_version"] = json!("0.7");
        let v07 = parse_spec(&tagged).unwrap();
        assert_eq!(
            sha256_canonical(&legacy.spec.to_value().unwrap()).unwrap(),
            sha256_canonical(&v07.spec.to_value().unwrap()).unwrap()
        );
    }

    #[test]
    fn duplicate_ids_are_a_construction_error() {
        let mut v = minimal_spec();
        v["sources"] = json!([
            {"id": "s:SUBJID", "name": "SUBJID", "type": "string"},
            {"id": "s:SUBJID", "name": "SUBJID2", "type": "string"}
        ]);
        let err = parse_spec(&v).unwrap_err();
        assert_matches!(err, CheshbonError::DuplicateId { ref ids } if ids == &vec!["s:SUBJID".to_string()]);
    }
}
