use std::time::Duration;
use tracing::{debug, error, info};

use super::OpenAIClient;
use crate::llm::types::{ChatRequest, ChatResponse};
use crate::llm::{DispatchError, LlmErrorKind};

/// One round trip. Retrying is left to the caller.
pub async fn chat_once(
    client: &OpenAIClient,
    req: &ChatRequest,
) -> Result<ChatResponse, DispatchError> {
    let url = client.endpoint();
    let cancel_token = client.cancel.clone().unwrap_or_default();
    let timeout_duration = Duration::from_millis(client.llm_cfg.timeout_ms);

    let req_builder = client
        .inner
        .post(&url)
        .bearer_auth(&client.api_key)
        .json(req);

    let resp = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => {
            info!("chat_once cancelled before response");
            return Err(DispatchError::new(LlmErrorKind::Cancelled, "request cancelled"));
        }
        res = tokio::time::timeout(timeout_duration, req_builder.send()) => match res {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                error!(err=%e, endpoint=%url, "llm chat_once send error");
                return Err(DispatchError::from_reqwest(&e));
            }
            Err(_) => {
                return Err(DispatchError::new(
                    LlmErrorKind::Timeout,
                    format!("no response within {}ms", timeout_duration.as_millis()),
                ));
            }
        },
    };

    let status = resp.status();
    let text = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => {
            info!("chat_once cancelled during body read");
            return Err(DispatchError::new(LlmErrorKind::Cancelled, "request cancelled"));
        }
        res = tokio::time::timeout(timeout_duration, resp.text()) => match res {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(DispatchError::from_reqwest(&e)),
            Err(_) => {
                return Err(DispatchError::new(
                    LlmErrorKind::Timeout,
                    "timed out reading response body",
                ));
            }
        },
    };

    if !status.is_success() {
        error!(status=%status.as_u16(), body=%text, "llm chat_once non-success status");
        return Err(DispatchError::from_status(status, &text));
    }

    debug!(bytes = text.len(), "llm chat_once response");
    serde_json::from_str::<ChatResponse>(&text).map_err(|e| DispatchError {
        kind: LlmErrorKind::Deserialize,
        status: Some(status.as_u16()),
        message: format!("parse chat response: {e}"),
    })
}
