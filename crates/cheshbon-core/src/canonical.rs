//! Canonical JSON encoding for deterministic hashing.
//!
//! This module implements the canonicalizer directly rather than layering
//! over a general-purpose encoder, so the hard rules are enforced on the
//! hot path:
//! - object keys are NFC-normalized and emitted in ascending codepoint order
//! - arrays preserve order; sets are sorted with an explicit total order
//! - integers only; floats are a hard validation error
//! - strings are NFC-normalized before emission
//! - compact separators (`","` and `":"`), no whitespace, UTF-8 output
//!
//! Two semantically equal values always produce identical bytes. Violations
//! abort with a path-annotated [`CheshbonError::Canonicalization`].

use std::cmp::Ordering;

use itertools::Itertools;
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

use crate::errors::{CheshbonError, CheshbonResult};

/// Serialize a JSON value to its canonical string form.
pub fn canonical_dumps(value: &Value) -> CheshbonResult<String> {
    let canonical = canonicalize_value(value, "")?;
    let mut out = String::new();
    write_value(&mut out, &canonical);
    Ok(out)
}

/// Canonicalize a value: NFC-normalize strings and keys, sort object keys,
/// reject floats. Array order is preserved (arrays are sequences, not sets).
pub fn canonicalize_value(value: &Value, path: &str) -> CheshbonResult<Value> {
    match value {
        Value::Null | Value::Bool(_) => Ok(value.clone()),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Ok(value.clone())
            } else {
                Err(CheshbonError::canonicalization(
                    path,
                    "floats are not allowed; use strings for decimals instead",
                ))
            }
        }
        Value::String(s) => Ok(Value::String(nfc(s))),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(canonicalize_value(item, &child_path_index(path, i))?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            // serde_json's default map is ordered; NFC on keys may still
            // reorder or merge entries, so rebuild explicitly. On a merge
            // the later key (in sorted source order) wins.
            let mut entries: Vec<(String, Value)> = Vec::with_capacity(map.len());
            for (key, val) in map.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
                entries.push((nfc(key), canonicalize_value(val, &child_path_key(path, key))?));
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (key, val) in entries {
                out.insert(key, val);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Canonicalize an array treated as a set: canonicalize each element, then
/// sort with the total order `(type_tag, value)` where the tag lattice is
/// `null < bool < int < string < mapping < array`. Within a tag, scalars
/// compare natively and containers compare by their canonical JSON string.
pub fn canonical_set(items: &[Value]) -> CheshbonResult<Vec<Value>> {
    let mut canonical = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        canonical.push(canonicalize_value(item, &child_path_index("", i))?);
    }
    canonical.sort_by(compare_set_items);
    Ok(canonical)
}

/// Stable type tag used by the set comparator.
fn type_tag(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
    }
}

fn compare_set_items(a: &Value, b: &Value) -> Ordering {
    let tag_order = type_tag(a).cmp(&type_tag(b));
    if tag_order != Ordering::Equal {
        return tag_order;
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => int_of(x).cmp(&int_of(y)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        // Containers are already canonical here, so their rendered form is
        // a total, deterministic key.
        _ => render(a).cmp(&render(b)),
    }
}

fn int_of(n: &serde_json::Number) -> i128 {
    if let Some(i) = n.as_i64() {
        i as i128
    } else if let Some(u) = n.as_u64() {
        u as i128
    } else {
        // Floats never reach the comparator; canonicalize_value rejects them.
        0
    }
}

fn render(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn nfc(s: &str) -> String {
    s.nfc().collect()
}

fn child_path_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn child_path_index(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

/// Emit an already-canonical value with compact separators.
fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, val)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, val);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_recursively_and_compact() {
        let v = json!({"b": {"y": 2, "x": 1}, "a": [3, 1]});
        let s = canonical_dumps(&v).unwrap();
        assert_eq!(s, r#"{"a":[3,1],"b":{"x":1,"y":2}}"#);
    }

    #[test]
    fn floats_rejected_with_path() {
        let v = json!({"outer": {"field": [0, {"value": 1.5}]}});
        let err = canonical_dumps(&v).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("outer.field[1].value"), "{msg}");
        assert!(msg.contains("floats are not allowed"));
    }

    #[test]
    fn nfc_equivalent_strings_emit_identical_bytes() {
        // U+00E9 vs U+0065 U+0301 (e + combining acute)
        let composed = json!({"k": "caf\u{e9}"});
        let decomposed = json!({"k": "cafe\u{301}"});
        assert_eq!(
            canonical_dumps(&composed).unwrap(),
            canonical_dumps(&decomposed).unwrap()
        );
    }

    #[test]
    fn nfc_applies_to_keys() {
        let composed = json!({"caf\u{e9}": 1});
        let decomposed = json!({"cafe\u{301}": 1});
        assert_eq!(
            canonical_dumps(&composed).unwrap(),
            canonical_dumps(&decomposed).unwrap()
        );
    }

    #[test]
    fn arrays_preserve_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_dumps(&v).unwrap(), "[3,1,2]");
    }

    #[test]
    fn set_sort_orders_mixed_types_by_tag() {
        let items = vec![
            json!("z"),
            json!([1]),
            json!(null),
            json!({"a": 1}),
            json!(2),
            json!(true),
        ];
        let sorted = canonical_set(&items).unwrap();
        let tags: Vec<u8> = sorted.iter().map(type_tag).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn set_sort_is_total_within_tags() {
        let items = vec![json!(10), json!(2), json!("b"), json!("a")];
        let sorted = canonical_set(&items).unwrap();
        assert_eq!(sorted, vec![json!(2), json!(10), json!("a"), json!("b")]);
    }

    #[test]
    fn control_characters_escaped() {
        let v = json!("a\nb\u{1}");
        assert_eq!(canonical_dumps(&v).unwrap(), "\"a\\nb\\u0001\"");
    }

    #[test]
    fn dumps_is_stable_across_calls() {
        let v = json!({"m": {"a": [1, 2, {"z": null}]}, "n": "x"});
        assert_eq!(canonical_dumps(&v).unwrap(), canonical_dumps(&v).unwrap());
    }
}
