//! Line-delimited JSON-RPC messages exchanged with the worker process.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// JSON-RPC version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";
/// Protocol version announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
/// Handshake request method.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Handshake completion notification method.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Tool execution request method.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Request expecting a response correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    /// Creates a request with the given id.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Fire-and-forget message (no `id`, no response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl RpcNotification {
    /// Creates a notification.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Serializes a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Returns the string id of an incoming message, if it carries one.
pub fn message_id(message: &Value) -> Option<&str> {
    message.get("id").and_then(Value::as_str)
}

/// Builds `initialize` params announcing the client identity.
pub fn initialize_params(client_name: &str, client_version: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "roots": {}, "sampling": {} },
        "clientInfo": { "name": client_name, "version": client_version },
    })
}

/// Builds `tools/call` params.
pub fn tool_call_params(tool_name: &str, arguments: Value) -> Value {
    json!({ "name": tool_name, "arguments": arguments })
}
