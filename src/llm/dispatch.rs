use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::backend::ChatBackend;
use crate::llm::types::{ChatRequest, ChatResponse};
use crate::llm::DispatchError;

/// Sends fully formed requests to a backend, optionally auditing them.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn ChatBackend>,
    verbose: bool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn ChatBackend>, verbose: bool) -> Self {
        Self { backend, verbose }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, DispatchError> {
        self.audit_request(request);
        let result = self.backend.send(request).await;
        self.audit_result(&result);
        result
    }

    pub fn send_blocking(&self, request: &ChatRequest) -> Result<ChatResponse, DispatchError> {
        self.audit_request(request);
        let result = self.backend.send_blocking(request);
        self.audit_result(&result);
        result
    }

    fn audit_request(&self, request: &ChatRequest) {
        if !self.verbose {
            return;
        }
        if let Ok(payload) = serde_json::to_string_pretty(request) {
            debug!(payload=%payload, "sending chat request");
        }
    }

    fn audit_result(&self, result: &Result<ChatResponse, DispatchError>) {
        if !self.verbose {
            return;
        }
        match result {
            Ok(response) => {
                if let Ok(payload) = serde_json::to_string_pretty(response) {
                    debug!(payload=%payload, "received chat response");
                }
            }
            Err(e) => warn!(kind=?e.kind, status=?e.status, "chat request failed: {}", e.message),
        }
    }
}
