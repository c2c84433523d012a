//! Adapter for clients that report completion through a callback.
//!
//! Each call creates a single-assignment [`Completion`] handle and hands it to
//! the submit function together with the request. Whatever event handler the
//! client exposes resolves the handle; the call awaits it directly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::traits::{
    Backend, BackendError, BackendMetadata, BackendReply, BackendRequest, BackendResult,
};

/// Single-assignment handle resolving one in-flight call.
#[derive(Debug)]
pub struct Completion {
    sender: oneshot::Sender<BackendResult<BackendReply>>,
}

impl Completion {
    /// Resolves the call. Returns `false` if the caller stopped waiting.
    pub fn complete(self, result: BackendResult<BackendReply>) -> bool {
        self.sender.send(result).is_ok()
    }
}

type SubmitFn = dyn Fn(BackendRequest, Completion) + Send + Sync;

/// Backend driven by an event callback instead of a returned future.
pub struct CallbackBackend {
    metadata: BackendMetadata,
    submit: Arc<SubmitFn>,
    timeout: Option<Duration>,
}

impl fmt::Debug for CallbackBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBackend")
            .field("provider", &self.metadata.provider())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CallbackBackend {
    /// Wraps a submit function. It must eventually call
    /// [`Completion::complete`] or drop the handle.
    #[must_use]
    pub fn new<F>(provider: &'static str, submit: F) -> Self
    where
        F: Fn(BackendRequest, Completion) + Send + Sync + 'static,
    {
        Self {
            metadata: BackendMetadata::new(provider),
            submit: Arc::new(submit),
            timeout: None,
        }
    }

    /// Fails calls whose completion does not arrive within `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Backend for CallbackBackend {
    fn metadata(&self) -> &BackendMetadata {
        &self.metadata
    }

    async fn call(&self, request: BackendRequest) -> BackendResult<BackendReply> {
        let (sender, receiver) = oneshot::channel();
        debug!(provider = self.metadata.provider(), "submitting callback request");
        (self.submit)(request, Completion { sender });

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, receiver).await.map_err(|_| {
                warn!(provider = self.metadata.provider(), ?limit, "callback completion timed out");
                BackendError::transport("callback completion timed out")
            })?,
            None => receiver.await,
        };

        outcome.map_err(|_| BackendError::transport("completion handle dropped without a result"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    use serde_json::json;
    use sweep_primitives::ModelId;

    fn request() -> BackendRequest {
        BackendRequest::new("ping", ModelId::new("socket").unwrap(), NonZeroU32::new(1).unwrap())
    }

    #[tokio::test]
    async fn resolves_from_another_task() {
        let backend = CallbackBackend::new("socket", |request, completion| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let reply = BackendReply::new(request.to_payload(), json!(["pong"]));
                completion.complete(Ok(reply));
            });
        });

        let reply = backend.call(request()).await.unwrap();
        assert_eq!(reply.raw_response, json!(["pong"]));
    }

    #[tokio::test]
    async fn dropped_handle_is_an_error() {
        let backend = CallbackBackend::new("socket", |_request, completion| drop(completion));
        let err = backend.call(request()).await.unwrap_err();
        assert!(matches!(err, BackendError::Transport { .. }));
    }

    #[tokio::test]
    async fn times_out_when_never_resolved() {
        let parked = Arc::new(std::sync::Mutex::new(Vec::new()));
        let keep = Arc::clone(&parked);
        let backend = CallbackBackend::new("socket", move |_request, completion| {
            keep.lock().unwrap().push(completion);
        })
        .with_timeout(Duration::from_millis(20));

        let err = backend.call(request()).await.unwrap_err();
        assert!(matches!(err, BackendError::Transport { .. }));
        assert_eq!(parked.lock().unwrap().len(), 1);
    }
}
