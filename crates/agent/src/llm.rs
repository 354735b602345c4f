//! LLM provider abstraction.
//!
//! Provider wire plumbing lives outside this crate; implementations translate
//! their native tool-call shapes with [`crate::adapters`].

use async_trait::async_trait;
use proto::{LlmError, ToolCall, ToolDefinition, ToolResult};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Represents a message in a chat history
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Semantic role of this message.
    pub role: Role,
    /// Human-readable text content.
    pub content: String,
    /// Tool call id when this is a tool result.
    pub tool_call_id: Option<String>,
    /// Tool name when this is a tool result.
    pub tool_name: Option<String>,
    /// Tool calls requested by assistant messages.
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: None,
        }
    }

    /// Creates a system-role message with the given content.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Creates a user-role message with the given content.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Creates an assistant-role message with the given content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Assistant message that requested `calls`.
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::text(Role::Assistant, "")
        }
    }

    /// Tool-result message carrying the `{status, ...}` response map as JSON text.
    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            tool_call_id: Some(result.id.clone()),
            tool_name: Some(result.name.clone()),
            ..Self::text(Role::Tool, result.response_json())
        }
    }
}

/// Request to the LLM
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Full chat history including system/user/assistant/tool messages.
    pub messages: Vec<ChatMessage>,
    /// Available tools schema.
    pub tools: Vec<ToolDefinition>,
    /// Target model id.
    pub model: String,
}

/// Token usage reported by the LLM for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Accumulates another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Response from the LLM
#[derive(Debug, Clone)]
pub enum ChatResponse {
    /// Final assistant text response.
    Text(String, TokenUsage),
    /// Assistant requested one or more tool calls.
    ToolCalls(Vec<ToolCall>, TokenUsage),
}

/// LLM provider trait
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Sends a chat request to the provider and returns either text or tool calls.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError>;
}
