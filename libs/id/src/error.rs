//! Error types for handle parsing and scope resolution.

use thiserror::Error;

/// Errors that can occur when parsing handles or resolving scopes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The handle string is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The handle contains whitespace.
    #[error("{kind} must not contain whitespace: '{value}'")]
    Whitespace { kind: &'static str, value: String },

    /// A numeric id could not be parsed.
    #[error("invalid {kind}: '{value}'")]
    InvalidNumber { kind: &'static str, value: String },

    /// An owner scope could not be derived from the instance tags.
    #[error("cannot resolve scope: {reason}")]
    UnresolvableScope { reason: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }

    /// Returns true if this error came from scope resolution.
    pub fn is_scope_error(&self) -> bool {
        matches!(self, IdError::UnresolvableScope { .. })
    }
}
