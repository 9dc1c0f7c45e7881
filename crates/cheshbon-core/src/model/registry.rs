//! Transform registry: versioned transform definitions with stable
//! implementation fingerprints.
//!
//! `version` is informational only; the authoritative identity of an
//! implementation is `impl_fingerprint.digest` (bare 64-hex sha256).
//! History is append-only: snapshots are immutable and
//! [`TransformEntry::add_history_entry`] returns a new entry, leaving the
//! original untouched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::format_description::well_known::Iso8601;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::errors::{CheshbonError, CheshbonResult};
use crate::hash::{is_hex_digest, is_prefixed_digest, SHA256_PREFIX};

/// Transform implementation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Builtin,
    ExternalSas,
    ExternalPy,
    TemplateSas,
}

/// Where an implementation fingerprint points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintSource {
    Builtin,
    ExternalSas,
    ExternalPy,
    TemplateSas,
    File,
    Git,
}

impl FingerprintSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::ExternalSas => "external_sas",
            Self::ExternalPy => "external_py",
            Self::TemplateSas => "template_sas",
            Self::File => "file",
            Self::Git => "git",
        }
    }
}

/// Transform signature with explicit input/output types. `output` is a
/// single type string, not a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Signature {
    pub inputs: Vec<String>,
    pub output: String,
}

/// Structured fingerprint locating a transform implementation. `ref` is an
/// opaque identifier (path, module, git ref); only `digest` participates in
/// change detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplFingerprint {
    #[serde(default = "default_algo")]
    pub algo: String,
    pub source: FingerprintSource,
    pub r#ref: String,
    pub digest: String,
}

fn default_algo() -> String {
    "sha256".to_string()
}

impl ImplFingerprint {
    fn validate(&self) -> Result<(), String> {
        if self.algo != "sha256" {
            return Err(format!(
                "impl_fingerprint.algo must be 'sha256', got '{}'",
                self.algo
            ));
        }
        if !is_hex_digest(&self.digest) {
            return Err(format!(
                "impl_fingerprint.digest must be 64 hex characters (sha256), got '{}' (length {})",
                self.digest,
                self.digest.len()
            ));
        }
        Ok(())
    }
}

/// An immutable history snapshot of a transform's state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformHistory {
    pub timestamp: String,
    pub impl_fingerprint: ImplFingerprint,
    pub params_schema_hash: Option<String>,
    pub change_reason: Option<String>,
}

impl TransformHistory {
    fn validate(&self) -> Result<(), String> {
        validate_timestamp(&self.timestamp)?;
        self.impl_fingerprint.validate()?;
        validate_params_schema_hash(self.params_schema_hash.as_deref())?;
        Ok(())
    }
}

/// Timestamps are caller-injected ISO-8601 strings; the core never reads a
/// clock.
fn validate_timestamp(ts: &str) -> Result<(), String> {
    if OffsetDateTime::parse(ts, &Iso8601::DEFAULT).is_ok()
        || PrimitiveDateTime::parse(ts, &Iso8601::DEFAULT).is_ok()
    {
        Ok(())
    } else {
        Err(format!("timestamp must be ISO 8601 format, got '{ts}'"))
    }
}

fn validate_params_schema_hash(hash: Option<&str>) -> Result<(), String> {
    match hash {
        None => Ok(()),
        Some(h) if is_prefixed_digest(h) => Ok(()),
        Some(h) => Err(format!(
            "params_schema_hash must be '{SHA256_PREFIX}' + 64 hex characters, got '{h}'"
        )),
    }
}

/// A transform registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformEntry {
    pub id: String,
    pub version: String,
    pub kind: TransformKind,
    pub signature: Signature,
    pub params_schema_hash: Option<String>,
    pub impl_fingerprint: ImplFingerprint,
    pub history: Vec<TransformHistory>,
}

#[derive(Deserialize)]
struct TransformEntryRaw {
    id: String,
    version: String,
    kind: TransformKind,
    signature: Signature,
    #[serde(default)]
    params_schema_hash: Option<String>,
    impl_fingerprint: ImplFingerprint,
    #[serde(default)]
    history: Vec<TransformHistory>,
}

impl<'de> Deserialize<'de> for TransformEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = TransformEntryRaw::deserialize(deserializer)?;
        TransformEntry::new(
            raw.id,
            raw.version,
            raw.kind,
            raw.signature,
            raw.params_schema_hash,
            raw.impl_fingerprint,
            raw.history,
        )
        .map_err(serde::de::Error::custom)
    }
}

impl TransformEntry {
    pub fn new(
        id: String,
        version: String,
        kind: TransformKind,
        signature: Signature,
        params_schema_hash: Option<String>,
        impl_fingerprint: ImplFingerprint,
        history: Vec<TransformHistory>,
    ) -> Result<Self, String> {
        if !id.starts_with("t:") {
            return Err(format!(
                "transform id '{id}' must start with 't:' (e.g. 't:ct_map')"
            ));
        }
        if id != id.to_lowercase() {
            return Err(format!(
                "transform id '{id}' must be lowercase with underscores (e.g. 't:ct_map', not 't:CT_MAP')"
            ));
        }
        validate_params_schema_hash(params_schema_hash.as_deref())?;
        impl_fingerprint.validate()?;
        for entry in &history {
            entry.validate()?;
        }
        Ok(Self {
            id,
            version,
            kind,
            signature,
            params_schema_hash,
            impl_fingerprint,
            history,
        })
    }

    /// The fingerprint digest in prefixed form.
    pub fn impl_hash(&self) -> String {
        format!("{SHA256_PREFIX}{}", self.impl_fingerprint.digest)
    }

    /// Append a history snapshot of the current state. Persistent update:
    /// returns a new entry, the original is unchanged.
    pub fn add_history_entry(
        &self,
        timestamp: &str,
        change_reason: Option<&str>,
    ) -> CheshbonResult<TransformEntry> {
        validate_timestamp(timestamp).map_err(CheshbonError::invalid_argument)?;
        let snapshot = TransformHistory {
            timestamp: timestamp.to_string(),
            impl_fingerprint: self.impl_fingerprint.clone(),
            params_schema_hash: self.params_schema_hash.clone(),
            change_reason: change_reason.map(str::to_string),
        };
        let mut next = self.clone();
        next.history.push(snapshot);
        Ok(next)
    }
}

/// Transform registry containing all available transforms. Ids are globally
/// unique; duplicates are a construction error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformRegistry {
    pub registry_version: String,
    pub transforms: Vec<TransformEntry>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TransformRegistryRaw {
    registry_version: String,
    transforms: Vec<TransformEntry>,
}

impl<'de> Deserialize<'de> for TransformRegistry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = TransformRegistryRaw::deserialize(deserializer)?;
        TransformRegistry::new(raw.registry_version, raw.transforms)
            .map_err(serde::de::Error::custom)
    }
}

impl TransformRegistry {
    pub fn new(registry_version: String, transforms: Vec<TransformEntry>) -> Result<Self, String> {
        let mut seen = std::collections::BTreeSet::new();
        let mut duplicates = std::collections::BTreeSet::new();
        for t in &transforms {
            if !seen.insert(t.id.as_str()) {
                duplicates.insert(t.id.clone());
            }
        }
        if !duplicates.is_empty() {
            return Err(format!(
                "duplicate transform ids found: {}; transform ids must be globally unique",
                duplicates.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        Ok(Self {
            registry_version,
            transforms,
        })
    }

    /// Parse a registry from a raw JSON document.
    pub fn from_value(value: &Value) -> CheshbonResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CheshbonError::invalid_argument(format!("invalid registry: {e}")))
    }

    pub fn get_transform(&self, transform_ref: &str) -> Option<&TransformEntry> {
        if !transform_ref.starts_with("t:") {
            return None;
        }
        self.transforms.iter().find(|t| t.id == transform_ref)
    }

    pub fn has_transform(&self, transform_ref: &str) -> bool {
        self.get_transform(transform_ref).is_some()
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.transforms.iter().map(|t| t.id.clone()).collect()
    }

    /// The normalized model as a JSON value, for input digests.
    pub fn to_value(&self) -> CheshbonResult<Value> {
        serde_json::to_value(self).map_err(|e| {
            CheshbonError::serialization(format!("failed to serialize registry: {e}"))
        })
    }
}
