use std::time::Duration;

use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Worker transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Tool normalization/execution error.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// LLM provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Worker transport errors.
///
/// Every failure of the channel itself collapses into [`TransportError::Connection`];
/// a timeout is reported separately because it says nothing about the health
/// of the worker.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Process absent, stream closed, broken pipe, or handshake rejected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No response arrived for a request within its deadline.
    #[error("Request '{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The request could not be correlated (e.g. its id is already in flight).
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Returns `true` for errors that invalidate the worker connection.
    pub fn is_connection(&self) -> bool {
        matches!(self, TransportError::Connection(_))
    }

    /// Returns `true` for request deadline errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// A tool argument failed its schema check. Resolved locally, never sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid '{field}'. {reason}")]
pub struct ValidationError {
    /// Tool the arguments were meant for.
    pub tool: String,
    /// Offending argument key.
    pub field: String,
    /// Human-readable constraint that was violated.
    pub reason: String,
}

impl ValidationError {
    /// Creates a validation error for `field` of `tool`.
    pub fn new(
        tool: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Tool pipeline errors
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// Arguments rejected before dispatch.
    #[error("Invalid arguments provided by AI: {0}")]
    Validation(#[from] ValidationError),

    /// The worker ran the tool and the tool reported failure.
    #[error("Worker tool failed: {0}")]
    WorkerTool(String),

    /// The worker answered with something that is not a valid response envelope.
    #[error("Malformed worker response: {0}")]
    Protocol(String),

    /// Transport-level failure while dispatching.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// LLM provider errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// Remote API failure.
    #[error("{0}")]
    Api(String),

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
