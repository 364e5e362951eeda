//! Error types for plexus-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Kind;

/// Every way a register operation or an assignment can fail.
///
/// These are returned verbatim to remote callers, so the variants carry plain
/// data only (no sources) and round-trip through serde.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegisterError {
    /// No register with this name exists.
    #[error("register not found: {name}")]
    NotFound { name: String },

    /// The register is read-only.
    #[error("register is immutable: {name}")]
    Immutable { name: String },

    /// The incoming value cannot be converted into the stored kind or shape.
    #[error("cannot assign {from} to {to}: {detail}")]
    IncompatibleKind { from: Kind, to: Kind, detail: String },

    /// A literal or a hierarchical-name encoding is malformed.
    #[error("invalid assignment '{subject}': {reason}")]
    InvalidAssignment { subject: String, reason: String },
}

impl RegisterError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn immutable(name: impl Into<String>) -> Self {
        Self::Immutable { name: name.into() }
    }

    pub fn invalid(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAssignment {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}
