use std::sync::Arc;
use std::time::Duration;

use proto::ToolDefinition;
use tools::ToolPipeline;
use transport::WorkerRpc;

use crate::guard::DEFAULT_MAX_CONSECUTIVE_TOOL_ROUNDS;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert assistant for Roblox Studio. \
Help the user by calling the provided tools to inspect and change their place. Think step by \
step, call tools with correctly formatted arguments, and ask a clarifying question when a \
request is ambiguous. After using tools, summarize the result. You cannot see the screen, so \
rely on tool output for information.";

/// Retry schedule for failed LLM calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: u32,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.initial_delay * self.backoff_factor.saturating_pow(retry.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2,
        }
    }
}

/// Runtime knobs shared by the turn loop.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub model: String,
    pub system_prompt: String,
    pub request_timeout: Duration,
    pub reconnect_attempts: u32,
    pub max_consecutive_tool_rounds: u32,
    pub llm_retry: RetryPolicy,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout: Duration::from_secs(60),
            reconnect_attempts: 5,
            max_consecutive_tool_rounds: DEFAULT_MAX_CONSECUTIVE_TOOL_ROUNDS,
            llm_retry: RetryPolicy::default(),
        }
    }
}

/// Everything a turn needs, built once at startup.
pub struct BrokerContext {
    worker: Arc<dyn WorkerRpc>,
    pipeline: ToolPipeline,
    settings: BrokerSettings,
}

impl BrokerContext {
    pub fn new(worker: Arc<dyn WorkerRpc>, settings: BrokerSettings) -> Self {
        let pipeline = ToolPipeline::new(Arc::clone(&worker), settings.request_timeout);
        Self {
            worker,
            pipeline,
            settings,
        }
    }

    pub fn worker(&self) -> &Arc<dyn WorkerRpc> {
        &self.worker
    }

    pub fn pipeline(&self) -> &ToolPipeline {
        &self.pipeline
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Tool declarations handed to the model.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        tools::definitions()
    }
}
