//! Prompt templates rendered into chat transcripts.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};
use tracing::debug;

use crate::assets::PromptAssets;
use crate::error::{Error, Result};
use crate::llm::types::{ChatMessage, Role};

/// Template engine used to render transcript sections.
///
/// Register filters, functions or globals on the wrapped [`Tera`] to make
/// them available to every prompt rendered through this environment.
#[derive(Debug, Clone, Default)]
pub struct PromptEnvironment {
    tera: Tera,
}

impl PromptEnvironment {
    pub fn with_tera(tera: Tera) -> Self {
        Self { tera }
    }

    pub fn tera_mut(&mut self) -> &mut Tera {
        &mut self.tera
    }

    pub fn render(&self, source: &str, context: &Context) -> Result<String> {
        // render_str needs a mutable engine, so each render works on a copy
        let mut tera = self.tera.clone();
        Ok(tera.render_str(source, context)?)
    }
}

fn role_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(system|user|assistant|tool):[ \t]*").expect("static regex")
    })
}

// Template markers are swapped for this separator before rendering, and
// bound strings are stripped of it, so only template text can open a message.
const SEPARATOR: char = '\u{1e}';

fn rendered_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new("\u{1e}(system|user|assistant|tool)\u{1e}").expect("static regex")
    })
}

fn strip_separator(value: &mut Value) {
    match value {
        Value::String(s) if s.contains(SEPARATOR) => s.retain(|c| c != SEPARATOR),
        Value::Array(items) => items.iter_mut().for_each(strip_separator),
        Value::Object(fields) => fields.values_mut().for_each(strip_separator),
        _ => {}
    }
}

/// A prompt template whose line-leading `role:` markers delimit messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    content: String,
}

impl Transcript {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// One of the templates shipped in `assets/prompts`.
    pub fn bundled(name: &str) -> Result<Self> {
        load_template(name).map(Self::new)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Render the whole template against `bindings`, then split it into
    /// messages, dropping those that end up blank.
    ///
    /// Text before the first marker is system text. Tera blocks may span
    /// markers, so a message can be included conditionally. Bound values that
    /// happen to contain `user:` or similar stay inside the message they were
    /// bound into.
    pub fn render_to_messages(
        &self,
        env: &PromptEnvironment,
        bindings: &Value,
    ) -> Result<Vec<ChatMessage>> {
        if !bindings.is_object() {
            return Err(Error::PromptRender(format!(
                "bindings must be an object, got {bindings}"
            )));
        }
        let mut bindings = bindings.clone();
        strip_separator(&mut bindings);
        let context = Context::from_value(bindings)?;

        let source = role_marker().replace_all(&self.content, "\u{1e}${1}\u{1e}");
        let rendered = env.render(&source, &context)?;

        let mut messages = Vec::new();
        let mut push = |role: Role, text: &str| {
            let text = text.trim();
            if !text.is_empty() {
                messages.push(ChatMessage::new(role, text));
            }
        };
        let mut role = Role::System;
        let mut start = 0;
        for caps in rendered_marker().captures_iter(&rendered) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push(role, &rendered[start..whole.start()]);
            role = Role::parse(name.as_str()).unwrap_or(Role::System);
            start = whole.end();
        }
        push(role, &rendered[start..]);
        debug!(count = messages.len(), "rendered transcript");
        Ok(messages)
    }
}

pub fn load_template(name: &str) -> Result<String> {
    let file = PromptAssets::get(&format!("{name}.md"))
        .ok_or_else(|| Error::PromptRender(format!("no bundled prompt named {name:?}")))?;
    String::from_utf8(file.data.into_owned())
        .map_err(|e| Error::PromptRender(format!("prompt {name:?} is not UTF-8: {e}")))
}
