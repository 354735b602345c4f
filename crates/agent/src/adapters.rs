//! Provider-specific tool-call shapes mapped onto [`ToolCall`].

use proto::{ArgMap, LlmError, ToolCall};
use serde_json::Value;

/// Maps a Gemini `functionCall` part: `{"name": ..., "args": {...}}`.
///
/// Gemini may omit the id; a fresh one is generated then.
pub fn from_gemini(call: &Value) -> Result<ToolCall, LlmError> {
    let name = required_name(call.get("name"), "functionCall")?;
    let args = object_args(call.get("args"), name)?;
    Ok(ToolCall::with_id(string_id(call), name, args))
}

/// Maps an Ollama / OpenAI-compatible tool call:
/// `{"id": ..., "function": {"name": ..., "arguments": ...}}`.
///
/// `arguments` may be an object or a JSON-encoded string.
pub fn from_ollama(call: &Value) -> Result<ToolCall, LlmError> {
    let function = call
        .get("function")
        .ok_or_else(|| LlmError::InvalidResponse("tool call has no 'function' member".to_string()))?;
    let name = required_name(function.get("name"), "function")?;
    let args = match function.get("arguments") {
        Some(Value::String(text)) if text.trim().is_empty() => ArgMap::new(),
        Some(Value::String(text)) => {
            let parsed: Value = serde_json::from_str(text).map_err(|e| {
                LlmError::Serialization(format!("arguments of '{name}' are not valid JSON: {e}"))
            })?;
            object_args(Some(&parsed), name)?
        }
        other => object_args(other, name)?,
    };
    Ok(ToolCall::with_id(string_id(call), name, args))
}

fn required_name<'a>(name: Option<&'a Value>, shape: &str) -> Result<&'a str, LlmError> {
    name.and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| LlmError::InvalidResponse(format!("{shape} has no tool name")))
}

fn object_args(args: Option<&Value>, name: &str) -> Result<ArgMap, LlmError> {
    match args {
        None | Some(Value::Null) => Ok(ArgMap::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(LlmError::InvalidResponse(format!(
            "arguments of '{name}' must be an object, got {other}"
        ))),
    }
}

fn string_id(call: &Value) -> Option<String> {
    call.get("id").and_then(Value::as_str).map(str::to_string)
}
