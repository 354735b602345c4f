//! Turn loop: model, guard, tool fan-out, worker health.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use proto::{LlmError, ToolResult, TransportError};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::context::BrokerContext;
use crate::guard::{GuardDecision, INTERVENTION_INSTRUCTION, REPEATED_TOOL_LOOP_NOTICE, TurnState};
use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, TokenUsage};

/// Operator-facing events raised while processing a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnNotice {
    /// The worker connection was found lost before the turn.
    ConnectionLost,
    /// A relaunched worker is ready again.
    Reconnected,
    /// The model kept calling tools after being told to stop.
    RepeatedToolLoop,
}

impl fmt::Display for TurnNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnNotice::ConnectionLost => f.write_str("Lost connection to the worker, reconnecting..."),
            TurnNotice::Reconnected => f.write_str("Reconnected to the worker."),
            TurnNotice::RepeatedToolLoop => f.write_str(REPEATED_TOOL_LOOP_NOTICE),
        }
    }
}

/// Result of one user turn.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Final natural-language reply, absent when the turn was halted.
    pub reply: Option<String>,
    /// Results of every tool call executed during the turn, in request order.
    pub tool_results: Vec<ToolResult>,
    pub notices: Vec<TurnNotice>,
    pub usage: TokenUsage,
}

impl TurnOutcome {
    /// `true` when the guard stopped the turn.
    pub fn halted(&self) -> bool {
        self.notices.contains(&TurnNotice::RepeatedToolLoop)
    }
}

/// Drives conversations between the model and the worker's tools.
pub struct AgentRuntime {
    llm: Arc<dyn LlmProvider>,
    context: Arc<BrokerContext>,
    history: Mutex<Vec<ChatMessage>>,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LlmProvider>, context: Arc<BrokerContext>) -> Self {
        Self {
            llm,
            context,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the conversation so far.
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().await.clone()
    }

    /// Processes one user utterance until the model replies or the guard stops it.
    ///
    /// Tool failures are fed back to the model as results. The only errors
    /// returned are LLM failures and a worker that cannot be reconnected.
    pub async fn process_turn(&self, user_message: &str) -> Result<TurnOutcome, proto::Error> {
        let mut history = self.history.lock().await;
        let mut outcome = TurnOutcome::default();
        self.ensure_worker(&mut outcome.notices).await?;

        let settings = self.context.settings();
        if history.is_empty() {
            history.push(ChatMessage::system(&settings.system_prompt));
        }
        history.push(ChatMessage::user(user_message));

        let mut guard = TurnState::new(settings.max_consecutive_tool_rounds);
        let tool_defs = self.context.tool_definitions();
        loop {
            let request = ChatRequest {
                messages: history.to_vec(),
                tools: tool_defs.clone(),
                model: settings.model.clone(),
            };
            match self.chat_with_retry(request).await? {
                ChatResponse::Text(text, usage) => {
                    outcome.usage.add(&usage);
                    info!("Agent final response: {text:.50}...");
                    history.push(ChatMessage::assistant(&text));
                    outcome.reply = Some(text);
                    return Ok(outcome);
                }
                ChatResponse::ToolCalls(calls, usage) if calls.is_empty() => {
                    outcome.usage.add(&usage);
                    warn!("Model returned an empty tool-call list, ending turn");
                    history.push(ChatMessage::assistant(""));
                    outcome.reply = Some(String::new());
                    return Ok(outcome);
                }
                ChatResponse::ToolCalls(calls, usage) => {
                    outcome.usage.add(&usage);
                    match guard.on_tool_round() {
                        GuardDecision::Proceed => {
                            debug!(
                                round = guard.consecutive_tool_rounds(),
                                "Tool calls requested: {:?}",
                                calls.iter().map(|c| c.name()).collect::<Vec<_>>()
                            );
                            history.push(ChatMessage::assistant_tool_calls(calls.clone()));
                            let pipeline = self.context.pipeline();
                            let results = join_all(calls.iter().map(|call| pipeline.execute(call))).await;
                            history.extend(results.iter().map(ChatMessage::tool_result));
                            outcome.tool_results.extend(results);
                        }
                        GuardDecision::Intervene => {
                            warn!(
                                rounds = guard.consecutive_tool_rounds(),
                                "Model keeps calling tools, injecting stop instruction"
                            );
                            history.push(ChatMessage::user(INTERVENTION_INSTRUCTION));
                        }
                        GuardDecision::Halt => {
                            warn!("Model ignored the stop instruction, halting turn");
                            outcome.notices.push(TurnNotice::RepeatedToolLoop);
                            return Ok(outcome);
                        }
                    }
                }
            }
        }
    }

    async fn ensure_worker(&self, notices: &mut Vec<TurnNotice>) -> Result<(), proto::Error> {
        let worker = self.context.worker();
        if worker.is_alive() {
            return Ok(());
        }

        warn!("Lost connection to the worker, reconnecting");
        notices.push(TurnNotice::ConnectionLost);
        let attempts = self.context.settings().reconnect_attempts;
        if worker.reconnect(attempts).await {
            info!("Worker connection restored");
            notices.push(TurnNotice::Reconnected);
            Ok(())
        } else {
            error!("Could not reconnect to the worker after {attempts} attempts");
            Err(TransportError::Connection(format!(
                "failed to reconnect to the worker after {attempts} attempts; restart the worker and the broker"
            ))
            .into())
        }
    }

    async fn chat_with_retry(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let policy = self.context.settings().llm_retry;
        let mut attempt = 1;
        loop {
            let t0 = Instant::now();
            match self.llm.chat(request.clone()).await {
                Ok(response) => {
                    debug!(elapsed_ms = %t0.elapsed().as_millis(), attempt, "LLM response received");
                    return Ok(response);
                }
                Err(LlmError::Api(msg)) if attempt < policy.max_attempts => {
                    let delay = policy.delay_before(attempt);
                    warn!(
                        "LLM API error (attempt {attempt}/{}): {msg}. Retrying in {}ms",
                        policy.max_attempts,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
