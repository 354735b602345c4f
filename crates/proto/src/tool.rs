use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ArgMap;
use crate::ToolError;

/// Provider-agnostic tool call handed to the pipeline.
///
/// The id is always populated: providers that do not supply one get a fresh
/// UUID at construction time, since the id is the key the result is returned
/// under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    id: String,
    name: String,
    args: ArgMap,
}

impl ToolCall {
    /// Creates a call with a generated id.
    pub fn new(name: impl Into<String>, args: ArgMap) -> Self {
        Self::with_id(None, name, args)
    }

    /// Creates a call keeping the provider id when present and non-empty.
    pub fn with_id(id: Option<String>, name: impl Into<String>, args: ArgMap) -> Self {
        let id = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id,
            name: name.into(),
            args,
        }
    }

    /// Correlation id of this call.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tool name as requested by the model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments as requested by the model.
    pub fn args(&self) -> &ArgMap {
        &self.args
    }
}

/// Status discriminator carried by every [`ToolResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Success,
    Error,
    ErrorFromWorkerTool,
    UnknownResponse,
}

impl ToolStatus {
    /// Wire spelling of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Error => "error",
            ToolStatus::ErrorFromWorkerTool => "error_from_worker_tool",
            ToolStatus::UnknownResponse => "unknown_response",
        }
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpreted worker response, serialized as a map tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResponse {
    /// The worker ran the tool successfully.
    Success {
        /// Free-form text produced by the worker's script.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Raw result for workers that answer without a content envelope.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    /// The broker could not run the tool (validation, transport, malformed reply).
    Error { details: String },
    /// The worker ran the tool and the tool reported failure.
    ErrorFromWorkerTool { tool_message: String },
    /// The worker answered with a result the broker does not understand.
    UnknownResponse { raw: Value },
}

impl ToolResponse {
    /// Returns the status discriminator.
    pub fn status(&self) -> ToolStatus {
        match self {
            ToolResponse::Success { .. } => ToolStatus::Success,
            ToolResponse::Error { .. } => ToolStatus::Error,
            ToolResponse::ErrorFromWorkerTool { .. } => ToolStatus::ErrorFromWorkerTool,
            ToolResponse::UnknownResponse { .. } => ToolStatus::UnknownResponse,
        }
    }

    /// Renders the response as the `{status, ...}` map handed back to the model.
    pub fn to_map(&self) -> serde_json::Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // Internally tagged enums always serialize to an object.
            _ => serde_json::Map::new(),
        }
    }
}

impl From<ToolError> for ToolResponse {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::WorkerTool(tool_message) => ToolResponse::ErrorFromWorkerTool { tool_message },
            other => ToolResponse::Error {
                details: other.to_string(),
            },
        }
    }
}

/// Result of one tool call, keyed by the same identity as the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the originating [`ToolCall`].
    pub id: String,
    /// Tool name as requested by the model.
    pub name: String,
    /// Interpreted response.
    pub response: ToolResponse,
}

impl ToolResult {
    /// Creates a result for `call` with the given response.
    pub fn for_call(call: &ToolCall, response: ToolResponse) -> Self {
        Self {
            id: call.id().to_string(),
            name: call.name().to_string(),
            response,
        }
    }

    /// Returns the response status.
    pub fn status(&self) -> ToolStatus {
        self.response.status()
    }

    /// Returns `true` unless the call succeeded.
    pub fn is_error(&self) -> bool {
        self.status() != ToolStatus::Success
    }

    /// JSON text of the response map, as fed back to the model.
    pub fn response_json(&self) -> String {
        Value::Object(self.response.to_map()).to_string()
    }
}

/// Tool declaration exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name the model calls the tool by.
    pub name: String,
    /// Human-readable description for tool selection.
    pub description: String,
    /// JSON schema of the accepted arguments.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Creates a tool declaration.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}
