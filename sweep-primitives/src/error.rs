//! Shared error definitions for prompt-sweep primitives.

use thiserror::Error;

/// Result alias used throughout the primitives crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// The supplied model identifier was empty or whitespace.
    #[error("invalid model id `{id}`: {reason}")]
    InvalidModelId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A rate-limit policy failed validation.
    #[error("invalid rate-limit policy: {reason}")]
    InvalidRateLimit {
        /// Human-readable reason for rejection.
        reason: String,
    },
}
