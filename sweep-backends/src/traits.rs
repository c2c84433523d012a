//! Shared backend traits and data structures.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sweep_primitives::ModelId;
use thiserror::Error;

use crate::extract::default_responses;

/// Result alias used by backends.
pub type BackendResult<T> = Result<T, BackendError>;

/// Error type shared by backend implementations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Backend is misconfigured or missing credentials.
    #[error("backend not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// The supplied request was invalid for the target model.
    #[error("invalid backend request: {reason}")]
    InvalidRequest {
        /// Reason describing why the request could not be processed.
        reason: String,
    },

    /// Transport-level failures (network, protocol, dropped completions).
    #[error("backend transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The provider rejected the request due to rate limiting.
    #[error("backend rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Suggested delay before retrying.
        retry_after: Option<Duration>,
    },

    /// The provider returned an error status or a malformed response.
    #[error("backend response error: {reason}")]
    Response {
        /// Additional context about the response failure.
        reason: String,
    },
}

impl BackendError {
    /// Convenience constructor for invalid requests.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for response failures.
    #[must_use]
    pub fn response(reason: impl Into<String>) -> Self {
        Self::Response {
            reason: reason.into(),
        }
    }
}

/// Minimal metadata describing a backend instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendMetadata {
    provider: &'static str,
}

impl BackendMetadata {
    /// Creates metadata for the supplied provider label.
    #[must_use]
    pub const fn new(provider: &'static str) -> Self {
        Self { provider }
    }

    /// Returns the provider label (e.g. `"http-json"`).
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        self.provider
    }
}

/// One call to a backend: `n` samples of `prompt` from `model`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    prompt: String,
    model: ModelId,
    n: NonZeroU32,
    temperature: f32,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    params: Map<String, Value>,
}

impl BackendRequest {
    /// Default sampling temperature.
    pub const DEFAULT_TEMPERATURE: f32 = 1.0;

    /// Creates a request for `n` samples at the default temperature.
    #[must_use]
    pub fn new(prompt: impl Into<String>, model: ModelId, n: NonZeroU32) -> Self {
        Self {
            prompt: prompt.into(),
            model,
            n,
            temperature: Self::DEFAULT_TEMPERATURE,
            params: Map::new(),
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets extra provider parameters forwarded verbatim.
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Returns the fully substituted prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Returns the target model.
    #[must_use]
    pub const fn model(&self) -> &ModelId {
        &self.model
    }

    /// Returns the number of samples requested.
    #[must_use]
    pub const fn n(&self) -> NonZeroU32 {
        self.n
    }

    /// Returns the sampling temperature.
    #[must_use]
    pub const fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Returns the extra provider parameters.
    #[must_use]
    pub const fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Flattens the request into a single JSON object.
    ///
    /// Extra parameters come first; the core fields are written last and win on
    /// a name clash.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let mut payload = self.params.clone();
        payload.insert("model".to_owned(), Value::from(self.model.as_str()));
        payload.insert("prompt".to_owned(), Value::from(self.prompt.as_str()));
        payload.insert("n".to_owned(), Value::from(self.n.get()));
        payload.insert("temperature".to_owned(), Value::from(f64::from(self.temperature)));
        Value::Object(payload)
    }
}

/// What a backend returns for one call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendReply {
    /// The exact request payload that was sent.
    pub query: Value,
    /// The provider's response, untouched.
    pub raw_response: Value,
}

impl BackendReply {
    /// Creates a reply.
    #[must_use]
    pub const fn new(query: Value, raw_response: Value) -> Self {
        Self {
            query,
            raw_response,
        }
    }
}

/// Trait implemented by all backends.
///
/// `call` may fail for any reason; the pipeline converts failures into soft
/// failures so one bad prompt never aborts the rest of a run. Implementations
/// own their client handles and any timeout policy.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns basic metadata describing the backend instance.
    fn metadata(&self) -> &BackendMetadata;

    /// Sends one request and returns the query and raw response.
    async fn call(&self, request: BackendRequest) -> BackendResult<BackendReply>;

    /// Extracts the completion texts from a raw response.
    fn extract_responses(&self, raw_response: &Value) -> Vec<String> {
        default_responses(raw_response)
    }
}
