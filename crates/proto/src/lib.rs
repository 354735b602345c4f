//! Shared protocol types for the broker transport, tool pipeline, and agent loop.
//!
//! This crate defines the canonical tool call/result structures, the
//! line-delimited JSON-RPC wire messages spoken with the worker process, and
//! strongly-typed error enums shared across the workspace.

pub mod error;
pub mod rpc;
pub mod tool;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of JSON-RPC wire message types and method names.
pub use rpc::{RpcNotification, RpcRequest};
/// Re-export of canonical tool call, result, and definition types.
pub use tool::{ToolCall, ToolDefinition, ToolResponse, ToolResult, ToolStatus};

/// Argument map carried by a tool call (insertion-ordered).
pub type ArgMap = serde_json::Map<String, serde_json::Value>;
