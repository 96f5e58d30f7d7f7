mod backend;
mod client_core;
mod dispatch;
pub mod types;

use reqwest::StatusCode;
use thiserror::Error;

pub use backend::*;
pub use client_core::*;
pub use dispatch::*;
pub use types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    Auth,
    RateLimited,
    MalformedRequest,
    Server,
    Network,
    Timeout,
    Deserialize,
    Cancelled,
    Unknown,
}

/// A failed round trip to the completion backend.
#[derive(Error, Debug, Clone)]
#[error("chat dispatch failed ({kind:?}): {message}")]
pub struct DispatchError {
    pub kind: LlmErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl DispatchError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        Self {
            kind: classify_status(status),
            status: Some(status.as_u16()),
            message: format!("{} - {}", status, body.trim()),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            LlmErrorKind::Timeout
        } else if err.is_connect() || err.is_body() || err.is_request() {
            LlmErrorKind::Network
        } else if err.is_decode() {
            LlmErrorKind::Deserialize
        } else {
            LlmErrorKind::Unknown
        };
        Self {
            kind,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

pub fn classify_status(status: StatusCode) -> LlmErrorKind {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return LlmErrorKind::Auth;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return LlmErrorKind::RateLimited;
    }
    if status == StatusCode::REQUEST_TIMEOUT {
        return LlmErrorKind::Timeout;
    }
    if status.is_server_error() {
        return LlmErrorKind::Server;
    }
    if status.is_client_error() {
        return LlmErrorKind::MalformedRequest;
    }
    LlmErrorKind::Unknown
}
