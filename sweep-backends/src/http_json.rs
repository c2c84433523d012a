//! Generic JSON-over-HTTP backend.
//!
//! Posts the flattened [`BackendRequest`] payload to a configured endpoint and
//! returns the decoded JSON body as the raw response. Completion texts are
//! located with a [`ResponsePath`], so any service that answers with JSON can be
//! used without a provider-specific adapter.

use std::{env, fmt, time::Duration};

use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Request, StatusCode, Uri};
use serde_json::Value;
use tokio::time::timeout;
use tracing::debug;

use crate::extract::ResponsePath;
use crate::http_client::{HyperClient, build_https_client, retry_after};
use crate::traits::{
    Backend, BackendError, BackendMetadata, BackendReply, BackendRequest, BackendResult,
};

/// Configuration for the [`HttpJsonBackend`].
#[derive(Clone, Debug)]
pub struct HttpJsonConfig {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    response_path: ResponsePath,
}

impl HttpJsonConfig {
    /// Creates a configuration posting to `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout: Duration::from_secs(60),
            response_path: ResponsePath::default(),
        }
    }

    /// Creates a configuration whose bearer token is read from `key_var`.
    #[must_use]
    pub fn from_env(endpoint: impl Into<String>, key_var: &str) -> Self {
        let mut cfg = Self::new(endpoint);
        cfg.api_key = env::var(key_var).ok().filter(|key| !key.trim().is_empty());
        cfg
    }

    /// Supplies an explicit bearer token.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets where completion texts live in the response body.
    #[must_use]
    pub fn with_response_path(mut self, path: ResponsePath) -> Self {
        self.response_path = path;
        self
    }
}

/// Backend that posts JSON to an HTTP(S) endpoint.
pub struct HttpJsonBackend {
    client: HyperClient,
    endpoint: Uri,
    metadata: BackendMetadata,
    api_key: Option<String>,
    timeout: Duration,
    response_path: ResponsePath,
}

impl fmt::Debug for HttpJsonBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpJsonBackend")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpJsonBackend {
    /// Constructs a backend from the supplied configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Configuration`] if the endpoint is not an
    /// absolute `http://` or `https://` URL.
    pub fn new(config: HttpJsonConfig) -> BackendResult<Self> {
        let endpoint = parse_endpoint(&config.endpoint)?;
        Ok(Self {
            client: build_https_client(),
            endpoint,
            metadata: BackendMetadata::new("http-json"),
            api_key: config.api_key,
            timeout: config.timeout,
            response_path: config.response_path,
        })
    }

    fn build_request(&self, payload: &Value) -> BackendResult<Request<Body>> {
        let body = serde_json::to_vec(payload).map_err(|err| {
            BackendError::invalid_request(format!("failed to encode request payload: {err}"))
        })?;

        let mut builder = Request::post(self.endpoint.clone()).header(CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
        }

        builder
            .body(Body::from(body))
            .map_err(|err| BackendError::transport(format!("failed to build request: {err}")))
    }
}

#[async_trait]
impl Backend for HttpJsonBackend {
    fn metadata(&self) -> &BackendMetadata {
        &self.metadata
    }

    async fn call(&self, request: BackendRequest) -> BackendResult<BackendReply> {
        let payload = request.to_payload();
        let http_request = self.build_request(&payload)?;

        debug!(
            endpoint = %self.endpoint,
            model = %request.model(),
            n = request.n().get(),
            "posting prompt"
        );

        let response = timeout(self.timeout, self.client.request(http_request))
            .await
            .map_err(|_| BackendError::transport("request timed out"))?
            .map_err(|err| BackendError::transport(format!("request failed: {err}")))?;

        let status = response.status();
        let wait = retry_after(response.headers());
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| BackendError::transport(format!("failed to read response: {err}")))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited { retry_after: wait });
        }
        if !status.is_success() {
            let reason = String::from_utf8_lossy(&bytes);
            return Err(BackendError::response(format!("endpoint returned {status}: {reason}")));
        }

        let raw_response: Value = serde_json::from_slice(&bytes)
            .map_err(|err| BackendError::response(format!("failed to decode response: {err}")))?;

        Ok(BackendReply::new(payload, raw_response))
    }

    fn extract_responses(&self, raw_response: &Value) -> Vec<String> {
        self.response_path.extract(raw_response)
    }
}

fn parse_endpoint(input: &str) -> BackendResult<Uri> {
    let trimmed = input.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(BackendError::configuration(
            "endpoint must start with http:// or https://",
        ));
    }
    trimmed
        .parse::<Uri>()
        .map_err(|err| BackendError::configuration(format!("invalid endpoint: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    use hyper::header::HeaderValue;
    use serde_json::json;
    use sweep_primitives::ModelId;

    #[test]
    fn endpoint_requires_scheme() {
        let err = HttpJsonBackend::new(HttpJsonConfig::new("localhost:8080/generate"))
            .expect_err("missing scheme should error");
        assert!(matches!(err, BackendError::Configuration { .. }));
    }

    #[tokio::test]
    async fn builds_authorised_json_request() {
        let backend = HttpJsonBackend::new(
            HttpJsonConfig::new("https://models.example.com/v1/generate").with_api_key("secret"),
        )
        .expect("backend");

        let payload = BackendRequest::new(
            "hello",
            ModelId::new("m").unwrap(),
            NonZeroU32::new(2).unwrap(),
        )
        .to_payload();
        let request = backend.build_request(&payload).expect("request");

        assert_eq!(request.uri().path(), "/v1/generate");
        assert_eq!(
            request.headers().get(AUTHORIZATION),
            Some(&HeaderValue::from_static("Bearer secret"))
        );
        assert_eq!(
            request.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
    }

    #[tokio::test]
    async fn extraction_uses_configured_path() {
        let backend = HttpJsonBackend::new(
            HttpJsonConfig::new("http://127.0.0.1:9/")
                .with_response_path(ResponsePath::new("/choices").with_item("/text")),
        )
        .expect("backend");

        let raw = json!({ "choices": [ { "text": "a" }, { "text": "b" } ] });
        assert_eq!(backend.extract_responses(&raw), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let backend = HttpJsonBackend::new(
            HttpJsonConfig::new("http://127.0.0.1:9/").with_timeout(Duration::from_secs(2)),
        )
        .expect("backend");

        let request = BackendRequest::new(
            "hello",
            ModelId::new("m").unwrap(),
            NonZeroU32::new(1).unwrap(),
        );
        let err = backend.call(request).await.expect_err("nothing listens on port 9");
        assert!(matches!(err, BackendError::Transport { .. }));
    }
}
