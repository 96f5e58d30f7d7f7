//! Turning chat responses back into validated values.

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::labels::LabelGrammar;
use crate::llm::types::{ChatRequest, ChatResponse};
use crate::schema::{TypeSpec, validate};

/// Validated arguments of every tool invocation in the first choice.
pub fn decode_tool_outputs(request: &ChatRequest, response: &ChatResponse) -> Result<Vec<Value>> {
    let calls = response
        .first_message()
        .map(|m| m.tool_calls.as_slice())
        .unwrap_or_default();

    if calls.is_empty() {
        if let Some(name) = request.forced_tool() {
            return Err(Error::EmptyOutput {
                expected: format!("invocation of tool `{name}`"),
            });
        }
        return Ok(Vec::new());
    }

    let tools = request.tools.as_deref().unwrap_or_default();
    let mut outputs = Vec::with_capacity(calls.len());
    for call in calls {
        let name = &call.function.name;
        let tool = tools
            .iter()
            .find(|t| &t.function.name == name)
            .ok_or_else(|| Error::UnknownTool { name: name.clone() })?;
        let arguments: Value = serde_json::from_str(&call.function.arguments).map_err(|e| {
            Error::validation(name.as_str(), format!("arguments are not valid JSON: {e}"))
        })?;
        let spec = TypeSpec::from_json_schema(&tool.function.parameters)?;
        let value = validate(&spec, &arguments).map_err(|e| match e {
            Error::Validation { path, message } => Error::Validation {
                path: path.replacen('$', name, 1),
                message,
            },
            other => other,
        })?;
        debug!(tool = %name, "decoded tool output");
        outputs.push(value);
    }
    Ok(outputs)
}

/// Take `field` out of the first tool output.
pub fn decode_field(outputs: Vec<Value>, field: &str) -> Result<Value> {
    let first = outputs.into_iter().next().ok_or_else(|| Error::EmptyOutput {
        expected: "tool output".into(),
    })?;
    match first {
        Value::Object(mut obj) => obj
            .remove(field)
            .ok_or_else(|| Error::validation(field, "missing required field")),
        other => Err(Error::validation(field, format!("expected object, got {other}"))),
    }
}

/// Read the first choice's text as a label index.
pub fn decode_label<'g>(grammar: &'g LabelGrammar, response: &ChatResponse) -> Result<&'g str> {
    let text = response
        .first_message()
        .and_then(|m| m.content.as_deref())
        .ok_or_else(|| Error::EmptyOutput {
            expected: "label index".into(),
        })?;
    grammar.decode(text)
}
