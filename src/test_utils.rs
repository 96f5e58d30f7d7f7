//! Scripted backend used by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::llm::{
    ChatBackend, ChatRequest, ChatResponse, Choice, ChoiceMessage, DispatchError, LlmErrorKind,
    ToolCall, ToolCallFunction,
};

pub(crate) enum Scripted {
    Respond(ChatResponse),
    Fail(DispatchError),
    /// Respond after a delay, to shuffle completion order
    Delayed(Duration, ChatResponse),
}

/// Replays scripted responses in order and records every request it receives.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    script: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<ChatRequest>>,
    in_flight: AtomicUsize,
    completed: AtomicUsize,
}

// counts a send as in flight until its future finishes or is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedBackend {
    pub(crate) fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_text<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(texts.into_iter().map(|t| Scripted::Respond(text_response(t))))
    }

    pub(crate) fn with_tool_args(args: impl IntoIterator<Item = Value>) -> Self {
        Self::new(
            args.into_iter()
                .map(|a| Scripted::Respond(tool_response("FormatResponse", a))),
        )
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().unwrap().clone()
    }

    /// Sends started but neither finished nor dropped.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Sends that ran to completion.
    pub(crate) fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, DispatchError> {
        let _guard = InFlight::enter(&self.in_flight);
        self.seen.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        let result = match next {
            Some(Scripted::Respond(resp)) => Ok(resp),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Delayed(delay, resp)) => {
                tokio::time::sleep(delay).await;
                Ok(resp)
            }
            None => Err(DispatchError::new(LlmErrorKind::Unknown, "script exhausted")),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

pub(crate) fn text_response(text: &str) -> ChatResponse {
    ChatResponse {
        id: None,
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: Some("assistant".into()),
                content: Some(text.to_string()),
                tool_calls: vec![],
            },
        }],
        usage: None,
    }
}

pub(crate) fn tool_response(name: &str, arguments: Value) -> ChatResponse {
    ChatResponse {
        id: None,
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: Some("assistant".into()),
                content: None,
                tool_calls: vec![ToolCall {
                    id: Some("call_0".into()),
                    r#type: "function".into(),
                    function: ToolCallFunction {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                }],
            },
        }],
        usage: None,
    }
}

pub(crate) fn data(value: Value) -> Value {
    json!({ "data": value })
}
