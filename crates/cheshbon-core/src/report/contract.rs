//! Report contract constants for all-details artifacts.
//!
//! These authenticate the algorithm: a report produced under a different
//! schema version, verifier contract, or canonicalization policy fails the
//! doctor's `header_contract` clause. Changing the policy id is a breaking
//! protocol change.

use serde::Serialize;
use serde_json::Value;

pub const ALL_DETAILS_SCHEMA_VERSION: &str = "0.1";
pub const VERIFIER_CONTRACT_VERSION: &str = "1";
pub const CANONICALIZATION_POLICY_ID: &str = "cheshbon.canonical-json.v1";

/// Caps applied while building an all-details report. Every cap that bites
/// leaves an omission record.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReportCaps {
    pub max_witnesses: usize,
    pub max_root_causes_per_node: usize,
    pub max_trigger_events_per_node: usize,
    pub max_top_roots: usize,
}

impl Default for ReportCaps {
    fn default() -> Self {
        Self {
            max_witnesses: 100_000,
            max_root_causes_per_node: 16,
            max_trigger_events_per_node: 16,
            max_top_roots: 50,
        }
    }
}

impl ReportCaps {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("caps are plain integers")
    }
}
