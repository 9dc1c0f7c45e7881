//! Content hashing over canonical JSON.
//!
//! All digests are SHA-256 of the canonical form from [`crate::canonical`].
//! Digests exported by the engine are prefixed `sha256:`; file-format
//! digests (`impl_fingerprint.digest`, parse-then-hash of documents) are
//! bare 64-hex. No implicit defaults: hashing is always sha256 here.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::canonical::canonical_dumps;
use crate::errors::{CheshbonError, CheshbonResult};

/// Digest prefix used by all engine-level hashes.
pub const SHA256_PREFIX: &str = "sha256:";

/// Hash raw bytes and return lowercase hex.
pub fn hash_bytes_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of the canonical JSON form, prefixed `sha256:`.
pub fn sha256_canonical(value: &Value) -> CheshbonResult<String> {
    let canonical = canonical_dumps(value)?;
    Ok(format!(
        "{SHA256_PREFIX}{}",
        hash_bytes_hex(canonical.as_bytes())
    ))
}

/// Hash transform params. An absent mapping digests as the empty mapping,
/// so "no params" and `{}` are the same content.
pub fn hash_params(params: Option<&Map<String, Value>>) -> CheshbonResult<String> {
    let value = match params {
        Some(map) => Value::Object(map.clone()),
        None => Value::Object(Map::new()),
    };
    sha256_canonical(&value)
}

/// Parse a JSON document and hash the parse, not the file bytes, so
/// pretty-printed and minified documents with the same semantic content
/// digest identically. Returns bare 64-hex (file-format convention).
pub fn sha256_canonical_parsed(json_bytes: &[u8]) -> CheshbonResult<String> {
    let value: Value = serde_json::from_slice(json_bytes)
        .map_err(|e| CheshbonError::serialization(format!("failed to parse JSON: {e}")))?;
    let canonical = canonical_dumps(&value)?;
    Ok(hash_bytes_hex(canonical.as_bytes()))
}

/// Short content id (first 8 hex of the canonical digest), used for
/// `evt:`/`iss:` identifiers inside all-details reports.
pub fn short_digest(value: &Value) -> CheshbonResult<String> {
    let canonical = canonical_dumps(value)?;
    let full = hash_bytes_hex(canonical.as_bytes());
    Ok(full[..8].to_string())
}

/// Validate a bare 64-hex sha256 digest.
pub fn is_hex_digest(digest: &str) -> bool {
    digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate a `sha256:`-prefixed digest.
pub fn is_prefixed_digest(digest: &str) -> bool {
    digest
        .strip_prefix(SHA256_PREFIX)
        .is_some_and(is_hex_digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_hash_stable() {
        let v = json!({"b": 1, "a": 2});
        let h1 = sha256_canonical(&v).unwrap();
        let h2 = sha256_canonical(&v).unwrap();
        assert_eq!(h1, h2);
        assert!(h1.starts_with("sha256:"));
        assert_eq!(h1.len(), 71);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"x": 1, "y": {"p": [1, 2], "q": "s"}});
        let b = json!({"y": {"q": "s", "p": [1, 2]}, "x": 1});
        assert_eq!(
            sha256_canonical(&a).unwrap(),
            sha256_canonical(&b).unwrap()
        );
    }

    #[test]
    fn absent_params_hash_like_empty_mapping() {
        let empty = Map::new();
        assert_eq!(
            hash_params(None).unwrap(),
            hash_params(Some(&empty)).unwrap()
        );
    }

    #[test]
    fn parse_then_hash_ignores_formatting() {
        let minified = br#"{"a":1,"b":[2,3]}"#;
        let pretty = b"{\n  \"b\": [2, 3],\n  \"a\": 1\n}";
        assert_eq!(
            sha256_canonical_parsed(minified).unwrap(),
            sha256_canonical_parsed(pretty).unwrap()
        );
    }

    #[test]
    fn short_digest_is_eight_hex() {
        let id = short_digest(&json!({"k": "v"})).unwrap();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_shape_validators() {
        assert!(is_hex_digest(&"a".repeat(64)));
        assert!(!is_hex_digest(&"a".repeat(63)));
        assert!(!is_hex_digest(&"g".repeat(64)));
        assert!(is_prefixed_digest(&format!("sha256:{}", "0".repeat(64))));
        assert!(!is_prefixed_digest(&"0".repeat(64)));
    }
}
