//! Error types for the cache subsystem.

use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by cache components.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying I/O failure while reading or writing the cache file.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// The cache file could not be encoded or decoded.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
