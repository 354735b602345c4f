//! Interpretation of worker responses to `tools/call`.

use proto::{ToolError, ToolResponse};
use serde_json::Value;

const WORKER_TOOL_FALLBACK: &str = "Worker tool reported an error without a message.";

/// Converts a full JSON-RPC response message into a [`ToolResponse`].
pub fn interpret(message: &Value) -> ToolResponse {
    let Some(outer) = message.as_object() else {
        return ToolError::Protocol(format!("expected a JSON object, got {message}")).into();
    };
    if let Some(result) = outer.get("result") {
        return interpret_result(result);
    }
    if let Some(error) = outer.get("error") {
        let details = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        return ToolResponse::Error { details };
    }
    ToolError::Protocol("response carries neither 'result' nor 'error'".to_string()).into()
}

fn interpret_result(result: &Value) -> ToolResponse {
    let Some(envelope) = result.as_object() else {
        return ToolError::Protocol(format!("result is not an object: {result}")).into();
    };
    if !envelope.contains_key("content") && !envelope.contains_key("isError") {
        return ToolResponse::Success {
            content: None,
            output: Some(result.clone()),
        };
    }

    match (envelope.get("isError"), content_texts(envelope.get("content"))) {
        (Some(Value::Bool(true)), texts) => {
            let message = texts
                .and_then(|texts| texts.into_iter().next())
                .unwrap_or_else(|| WORKER_TOOL_FALLBACK.to_string());
            ToolError::WorkerTool(message).into()
        }
        (None | Some(Value::Bool(false)), Some(texts)) => ToolResponse::Success {
            content: Some(texts.join("\n")),
            output: None,
        },
        _ => ToolResponse::UnknownResponse {
            raw: result.clone(),
        },
    }
}

/// Texts of the content items, or `None` when the content list is malformed.
///
/// Items of other types (images, resources) are skipped.
fn content_texts(content: Option<&Value>) -> Option<Vec<String>> {
    let items = content?.as_array()?;
    let mut texts = Vec::with_capacity(items.len());
    for item in items {
        let item = item.as_object()?;
        let is_text = item
            .get("type")
            .and_then(Value::as_str)
            .is_none_or(|kind| kind == "text");
        if is_text {
            texts.push(item.get("text")?.as_str()?.to_string());
        }
    }
    Some(texts)
}
