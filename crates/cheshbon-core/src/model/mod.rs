//! Cheshbon data models.
//!
//! Strongly-typed representations of the wire formats the engine consumes:
//! mapping specifications, transform registries, bindings, and raw schemas.
//!
//! Design rules (carried from the canonicalization contract):
//! - Every entity is immutable after construction; "mutation" derives a new
//!   value (see `TransformEntry::add_history_entry`).
//! - Canonical bytes for hashing are produced by `crate::canonical`, never
//!   by default serde formatting.
//! - Validation happens at parse time; a constructed value is always valid.

pub mod bindings;
pub mod compat;
pub mod registry;
pub mod spec;

pub use bindings::{Bindings, RawColumn, RawSchema};
pub use compat::{parse_spec, ParsedSpec};
pub use registry::{ImplFingerprint, Signature, TransformEntry, TransformHistory, TransformRegistry};
pub use spec::{ConstraintNode, DerivedVariable, MappingSpec, SourceColumn};
