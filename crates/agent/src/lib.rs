//! Agent runtime, consecutive-call guard, and LLM adapter interfaces.

pub mod adapters;
pub mod context;
pub mod guard;
pub mod llm;
pub mod runtime;

/// Explicit broker state built once at startup.
pub use context::{BrokerContext, BrokerSettings, RetryPolicy};
/// Consecutive tool-call guard.
pub use guard::{DEFAULT_MAX_CONSECUTIVE_TOOL_ROUNDS, GuardDecision, TurnState};
/// Chat request/response models and provider interfaces.
pub use llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, Role, TokenUsage};
/// Main runtime orchestration loop.
pub use runtime::{AgentRuntime, TurnNotice, TurnOutcome};
