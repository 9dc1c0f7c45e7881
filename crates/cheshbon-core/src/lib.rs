//! cheshbon-core
//!
//! Core primitives for Cheshbon, a deterministic change-impact engine for
//! declarative data-mapping specifications:
//! - Canonical JSON encoding for deterministic hashing (floats banned, NFC)
//! - Spec / transform-registry / bindings models with stable typed ids
//! - Structural diff producing a closed change-event ontology
//! - Dependency graph with validation and path queries
//! - Event-driven impact propagation with a reason-precedence lattice
//! - Binding-aware impact overlay
//! - All-details report builder and an independent verifier ("doctor")
//!
//! The whole crate is a pure function of its inputs: no I/O, no clocks,
//! no randomness, no global mutable state. Given identical inputs, every
//! output (including the final canonical JSON bytes) is bit-identical.

pub mod api;
pub mod binding_impact;
pub mod canonical;
pub mod diff;
pub mod errors;
pub mod explain;
pub mod graph;
pub mod hash;
pub mod impact;
pub mod model;
pub mod report;

pub use crate::errors::{CheshbonError, CheshbonResult};

/// Current mapping-spec schema version. Documents carrying no
/// `schema_version` are treated as the legacy version and normalized in
/// memory; stored bytes are never rewritten.
pub const SPEC_SCHEMA_VERSION: &str = "0.7";
pub const SPEC_SCHEMA_VERSION_LEGACY: &str = "0.6";

/// Convenience re-exports.
pub mod prelude {
    pub use crate::api::{
        diff, diff_all_details, validate, DetailLevel, DiffInputs, DiffResult, RunStatus,
        ValidationCode, ValidationIssue, ValidationResult,
    };
    pub use crate::canonical::{canonical_dumps, canonical_set};
    pub use crate::diff::{ChangeEvent, ChangeType};
    pub use crate::graph::DependencyGraph;
    pub use crate::hash::{sha256_canonical, sha256_canonical_parsed};
    pub use crate::impact::{ImpactReason, ImpactResult};
    pub use crate::model::bindings::{Bindings, RawColumn, RawSchema};
    pub use crate::model::registry::{TransformEntry, TransformRegistry};
    pub use crate::model::spec::MappingSpec;
    pub use crate::report::doctor::{run_doctor, DoctorInputs, DoctorMode, DoctorReport};
    pub use crate::{CheshbonError, CheshbonResult};
}
