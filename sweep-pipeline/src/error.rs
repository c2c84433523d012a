//! Error types for the query pipeline.

use sweep_backends::traits::BackendError;
use sweep_cache::{CacheError, ResponseRecord};
use sweep_templates::TemplateError;
use thiserror::Error;

/// Result alias for operations that fail before any backend call is made.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Fatal errors: the run is rejected before spending anything.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The template or its variables are malformed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The response cache could not be read or reset.
    #[error("response cache unavailable: {source}")]
    Cache {
        /// Underlying cache failure.
        #[from]
        source: CacheError,
    },
}

/// A single backend invocation that did not produce a reply.
///
/// This is the soft failure: it is yielded in place of the prompt's record and
/// the run continues.
#[derive(Debug, Error)]
pub enum BackendCallError {
    /// The backend returned an error.
    #[error("backend call failed for prompt {prompt:?}: {source}")]
    Failed {
        /// Prompt that was being queried.
        prompt: String,
        /// Error reported by the backend.
        #[source]
        source: BackendError,
    },

    /// The task running the call panicked or was cancelled.
    #[error("backend task for prompt {prompt:?} did not complete: {reason}")]
    Aborted {
        /// Prompt that was being queried.
        prompt: String,
        /// Description of the join failure.
        reason: String,
    },
}

impl BackendCallError {
    /// Returns the prompt whose call failed.
    #[must_use]
    pub fn prompt(&self) -> &str {
        match self {
            Self::Failed { prompt, .. } | Self::Aborted { prompt, .. } => prompt,
        }
    }
}

/// Per-prompt failure yielded by the query stream.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The backend call failed; nothing was cached for this prompt.
    #[error(transparent)]
    Backend(#[from] BackendCallError),

    /// The cache could not be consulted for this prompt.
    #[error("cache lookup failed for prompt {prompt:?}: {source}")]
    Lookup {
        /// Prompt being looked up.
        prompt: String,
        /// Underlying cache failure.
        #[source]
        source: CacheError,
    },

    /// New responses were merged in memory but writing the cache failed.
    ///
    /// The record is carried here so it is not lost; it also remains in the
    /// run's in-memory cache and is written by the next successful save.
    #[error("responses for prompt {:?} were merged but not persisted: {source}", .record.prompt())]
    Persist {
        /// The merged record, already truncated to the requested sample count.
        record: Box<ResponseRecord>,
        /// Underlying cache failure.
        #[source]
        source: CacheError,
    },
}

impl QueryError {
    /// Returns `true` for backend soft failures.
    #[must_use]
    pub const fn is_soft(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Returns the prompt the failure belongs to.
    #[must_use]
    pub fn prompt(&self) -> &str {
        match self {
            Self::Backend(err) => err.prompt(),
            Self::Lookup { prompt, .. } => prompt,
            Self::Persist { record, .. } => record.prompt(),
        }
    }

    /// Returns the record that was obtained despite the failure, if any.
    #[must_use]
    pub fn record(&self) -> Option<&ResponseRecord> {
        match self {
            Self::Persist { record, .. } => Some(record.as_ref()),
            Self::Backend(_) | Self::Lookup { .. } => None,
        }
    }
}

/// One element of the query stream.
pub type QueryOutcome = Result<ResponseRecord, QueryError>;
