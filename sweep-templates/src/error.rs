//! Errors raised while parsing templates or generating permutations.

use thiserror::Error;

/// Result alias for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur during template operations.
///
/// Both variants are fatal for a run: they are detected before any backend
/// call is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The template body does not follow the `${identifier}` grammar.
    #[error("template syntax error at byte {position}: {reason}")]
    Syntax {
        /// Byte offset of the offending `${`.
        position: usize,
        /// Reason for the failure.
        reason: String,
    },

    /// A variable was bound to a value of an unsupported shape.
    #[error("variable `{name}` has unsupported value type: {found}")]
    InvalidParameterType {
        /// Name of the offending variable.
        name: String,
        /// Description of the value that was supplied.
        found: String,
    },
}

impl TemplateError {
    /// Convenience constructor for invalid parameter types.
    #[must_use]
    pub fn invalid_parameter(name: impl Into<String>, found: impl Into<String>) -> Self {
        Self::InvalidParameterType {
            name: name.into(),
            found: found.into(),
        }
    }
}
