//! Adapter for synchronous client libraries.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::traits::{
    Backend, BackendError, BackendMetadata, BackendReply, BackendRequest, BackendResult,
};

type BlockingCall = dyn Fn(&BackendRequest) -> BackendResult<BackendReply> + Send + Sync;

/// Runs a blocking client call on tokio's blocking pool so it never stalls the
/// pipeline's event loop.
///
/// The closure typically captures a client handle constructed once by the
/// caller.
pub struct BlockingBackend {
    metadata: BackendMetadata,
    call: Arc<BlockingCall>,
}

impl fmt::Debug for BlockingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingBackend")
            .field("provider", &self.metadata.provider())
            .finish_non_exhaustive()
    }
}

impl BlockingBackend {
    /// Wraps a synchronous call.
    #[must_use]
    pub fn new<F>(provider: &'static str, call: F) -> Self
    where
        F: Fn(&BackendRequest) -> BackendResult<BackendReply> + Send + Sync + 'static,
    {
        Self {
            metadata: BackendMetadata::new(provider),
            call: Arc::new(call),
        }
    }
}

#[async_trait]
impl Backend for BlockingBackend {
    fn metadata(&self) -> &BackendMetadata {
        &self.metadata
    }

    async fn call(&self, request: BackendRequest) -> BackendResult<BackendReply> {
        let call = Arc::clone(&self.call);
        debug!(provider = self.metadata.provider(), "offloading blocking backend call");
        tokio::task::spawn_blocking(move || call(&request))
            .await
            .map_err(|err| BackendError::transport(format!("blocking call did not complete: {err}")))?
    }
}
