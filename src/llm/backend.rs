use async_trait::async_trait;
use std::future::Future;

use crate::llm::types::{ChatRequest, ChatResponse};
use crate::llm::{DispatchError, LlmErrorKind};

/// "Send chat request, get chat response". One call is one round trip.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, DispatchError>;

    /// Drives [`ChatBackend::send`] to completion on a private current-thread runtime.
    fn send_blocking(&self, request: &ChatRequest) -> Result<ChatResponse, DispatchError> {
        block_on_dispatch(self.send(request))
    }
}

/// Run a dispatch future on a fresh current-thread runtime.
///
/// Returns an error instead of panicking when called from inside a tokio runtime.
pub fn block_on_dispatch<F>(future: F) -> Result<ChatResponse, DispatchError>
where
    F: Future<Output = Result<ChatResponse, DispatchError>>,
{
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(DispatchError::new(
            LlmErrorKind::Unknown,
            "blocking dispatch called from within an async runtime; use the async path",
        ));
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            DispatchError::new(LlmErrorKind::Unknown, format!("build blocking runtime: {e}"))
        })?;
    runtime.block_on(future)
}
