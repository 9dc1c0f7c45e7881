//! Error types for cheshbon-core.
//!
//! All errors are deterministic: messages are built only from input data,
//! never from environment, paths, or timing. Structured payloads (missing
//! dependency sets, cycle paths) are carried on the variant so callers can
//! map them to stable validation codes without parsing messages.

use std::collections::BTreeSet;

use thiserror::Error;

pub type CheshbonResult<T> = Result<T, CheshbonError>;

#[derive(Debug, Error)]
pub enum CheshbonError {
    /// A caller supplied an invalid argument or document.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A value cannot be canonicalized (floats, unsupported kinds).
    #[error("canonicalization error at {path}: {message}")]
    Canonicalization { path: String, message: String },

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An internal invariant was violated.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Duplicate stable ids within one document.
    #[error("duplicate ids found: {}", .ids.join(", "))]
    DuplicateId { ids: Vec<String> },

    /// Dependencies referenced but not defined in the spec.
    #[error("dependencies referenced but not defined: {}", format_id_set(.missing))]
    MissingDependencies { missing: BTreeSet<String> },

    /// A dependency cycle in the graph. `cycle` holds the rotated cycle
    /// (starting at its lexicographically smallest id, closing node not
    /// repeated); `edge_kinds` holds the participating `kind->kind` pairs.
    #[error("{}", format_cycle(.cycle, .edge_kinds))]
    CycleDetected {
        cycle: Vec<String>,
        edge_kinds: Vec<String>,
    },
}

impl CheshbonError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn canonicalization(path: impl Into<String>, message: impl Into<String>) -> Self {
        let path = path.into();
        Self::Canonicalization {
            path: if path.is_empty() {
                "(root)".to_string()
            } else {
                path
            },
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }
}

fn format_id_set(ids: &BTreeSet<String>) -> String {
    ids.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn format_cycle(cycle: &[String], edge_kinds: &[String]) -> String {
    let cycle_str = if cycle.is_empty() {
        String::new()
    } else {
        format!("{} -> {}", cycle.join(" -> "), cycle[0])
    };
    let mut msg = format!("cycle detected in dependency graph: {cycle_str}");
    let unique_kinds: BTreeSet<&String> = edge_kinds.iter().collect();
    if !unique_kinds.is_empty() {
        let kinds = unique_kinds
            .into_iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        msg.push_str(&format!(" (edge kinds: {kinds})"));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dependencies_message_is_sorted() {
        let missing: BTreeSet<String> = ["s:B".to_string(), "s:A".to_string()].into();
        let err = CheshbonError::MissingDependencies { missing };
        assert_eq!(
            err.to_string(),
            "dependencies referenced but not defined: s:A, s:B"
        );
    }

    #[test]
    fn cycle_message_closes_the_loop() {
        let err = CheshbonError::CycleDetected {
            cycle: vec!["d:A".to_string(), "d:B".to_string()],
            edge_kinds: vec!["derived->derived".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("d:A -> d:B -> d:A"));
        assert!(msg.contains("derived->derived"));
    }

    #[test]
    fn canonicalization_path_defaults_to_root() {
        let err = CheshbonError::canonicalization("", "floats are not allowed");
        assert!(err.to_string().contains("at (root)"));
    }
}
