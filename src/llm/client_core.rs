use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;
use crate::llm::backend::{ChatBackend, block_on_dispatch};
use crate::llm::types::{ChatRequest, ChatResponse};
use crate::llm::DispatchError;

mod network;

/// Backend for OpenAI-compatible `chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    pub base_url: String,
    pub api_key: String,
    pub(crate) inner: reqwest::Client,
    pub llm_cfg: LlmConfig,
    pub(crate) cancel: Option<CancellationToken>,
}

impl OpenAIClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let inner = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            inner,
            llm_cfg: LlmConfig::default(),
            cancel: None,
        })
    }

    pub fn with_llm_config(mut self, cfg: LlmConfig) -> Self {
        let builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        // keep the previous client if the builder rejects the settings
        if let Ok(c) = builder.build() {
            self.inner = c;
        }
        self.llm_cfg = cfg;
        self
    }

    /// Every request sent through this client aborts once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base).trim_end_matches('/');
        format!("{base}/v1/chat/completions")
    }
}

#[async_trait]
impl ChatBackend for OpenAIClient {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, DispatchError> {
        network::chat_once(self, request).await
    }

    fn send_blocking(&self, request: &ChatRequest) -> Result<ChatResponse, DispatchError> {
        // pooled connections belong to the runtime that opened them
        let fresh = self.clone().with_llm_config(self.llm_cfg.clone());
        block_on_dispatch(network::chat_once(&fresh, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ChatMessage, Role, ToolChoice};
    use crate::llm::LlmErrorKind;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    fn request() -> ChatRequest {
        ChatRequest::new("gpt-test", vec![ChatMessage::new(Role::User, "hi")])
    }

    #[tokio::test]
    async fn send_happy_path() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v1/chat/completions"),
                request::headers(contains(key("authorization"))),
            ])
            .respond_with(json_encoded(serde_json::json!({
                "id": "test",
                "choices": [
                    {"index":0, "message": {"role":"assistant","content":"hello"}}
                ]
            }))),
        );

        let client = OpenAIClient::new(format!("{}/", server.url_str("")), "test-key").unwrap();
        let resp = client.send(&request()).await.unwrap();
        assert_eq!(resp.first_message().unwrap().content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn send_forwards_tool_choice() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v1/chat/completions"),
                request::body(json_decoded(eq(serde_json::json!({
                    "model": "gpt-test",
                    "messages": [{"role": "user", "content": "hi"}],
                    "tool_choice": {"type": "function", "function": {"name": "FormatResponse"}}
                })))),
            ])
            .respond_with(json_encoded(serde_json::json!({
                "choices": [{"index":0, "message": {"role":"assistant","content":null}}]
            }))),
        );

        let client = OpenAIClient::new(server.url_str(""), "k").unwrap();
        let mut req = request();
        req.tool_choice = Some(ToolChoice::function("FormatResponse"));
        let resp = client.send(&req).await.unwrap();
        assert!(resp.first_message().unwrap().content.is_none());
    }

    #[tokio::test]
    async fn send_accepts_null_tool_calls() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/chat/completions"))
                .respond_with(json_encoded(serde_json::json!({
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "1", "tool_calls": null}
                    }]
                }))),
        );

        let client = OpenAIClient::new(server.url_str(""), "k").unwrap();
        let resp = client.send(&request()).await.unwrap();
        let msg = resp.first_message().unwrap();
        assert_eq!(msg.content.as_deref(), Some("1"));
        assert!(msg.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn send_classifies_auth_failure_without_retrying() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/chat/completions"))
                .times(1)
                .respond_with(status_code(401).body("bad key")),
        );
        let client = OpenAIClient::new(server.url_str(""), "wrong").unwrap();
        let err = client.send(&request()).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Auth);
        assert_eq!(err.status, Some(401));
        assert!(err.message.contains("bad key"));
    }

    #[tokio::test]
    async fn send_server_error_is_not_retried() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/chat/completions"))
                .times(1)
                .respond_with(status_code(500).body("oops")),
        );
        let client = OpenAIClient::new(server.url_str(""), "x").unwrap();
        let err = client.send(&request()).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Server);
    }

    #[tokio::test]
    async fn send_malformed_body_is_deserialize_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/chat/completions"))
                .respond_with(status_code(200).body("not json")),
        );
        let client = OpenAIClient::new(server.url_str(""), "x").unwrap();
        let err = client.send(&request()).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Deserialize);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_send() {
        let server = Server::run();
        let token = CancellationToken::new();
        token.cancel();
        let client = OpenAIClient::new(server.url_str(""), "x")
            .unwrap()
            .with_cancellation(token);
        let err = client.send(&request()).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Cancelled);
    }

    #[test]
    fn send_blocking_outside_runtime() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/chat/completions"))
                .respond_with(json_encoded(serde_json::json!({
                    "choices": [{"index":0, "message": {"role":"assistant","content":"1"}}]
                }))),
        );
        let client = OpenAIClient::new(server.url_str(""), "x").unwrap();
        let resp = client.send_blocking(&request()).unwrap();
        assert_eq!(resp.first_message().unwrap().content.as_deref(), Some("1"));
    }

    #[test]
    fn endpoint_normalization() {
        let c = OpenAIClient::new("https://api.example.com/v1/", "x").unwrap();
        assert_eq!(c.endpoint(), "https://api.example.com/v1/chat/completions");
        let c2 = OpenAIClient::new("https://api.example.com/", "x").unwrap();
        assert_eq!(c2.endpoint(), "https://api.example.com/v1/chat/completions");
        let c3 = OpenAIClient::new("https://gw.example.com/v1beta/openai", "x").unwrap();
        assert_eq!(
            c3.endpoint(),
            "https://gw.example.com/v1beta/openai/v1/chat/completions"
        );
        let c4 = OpenAIClient::new("https://api.example.com/v10", "x").unwrap();
        assert_eq!(c4.endpoint(), "https://api.example.com/v10/v1/chat/completions");
    }
}
