//! Consecutive tool-call guard.

/// Tool rounds allowed in one turn before the model is told to stop.
pub const DEFAULT_MAX_CONSECUTIVE_TOOL_ROUNDS: u32 = 3;

/// Instruction injected when the model keeps calling tools.
pub const INTERVENTION_INSTRUCTION: &str = "You have called tools several times in a row \
without replying to the user. Do not call any more tools for this request. Summarize what \
the tool results so far show, or ask the user a clarifying question.";

/// Notice surfaced when the model ignores the intervention.
pub const REPEATED_TOOL_LOOP_NOTICE: &str =
    "Stopped this request: the model is stuck in a repeated tool-call loop.";

/// What the runtime should do with a model response that requested tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Execute the calls.
    Proceed,
    /// Skip the calls and inject [`INTERVENTION_INSTRUCTION`].
    Intervene,
    /// End the turn without executing anything.
    Halt,
}

/// Per-turn counter of tool rounds without a natural-language reply.
#[derive(Debug, Clone)]
pub struct TurnState {
    consecutive_tool_rounds: u32,
    intervened: bool,
    threshold: u32,
}

impl TurnState {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_tool_rounds: 0,
            intervened: false,
            threshold,
        }
    }

    /// Clears the counter at the start of a user utterance.
    pub fn reset(&mut self) {
        self.consecutive_tool_rounds = 0;
        self.intervened = false;
    }

    /// Records a model response carrying tool calls.
    pub fn on_tool_round(&mut self) -> GuardDecision {
        if self.intervened {
            return GuardDecision::Halt;
        }
        self.consecutive_tool_rounds += 1;
        if self.consecutive_tool_rounds > self.threshold {
            self.intervened = true;
            GuardDecision::Intervene
        } else {
            GuardDecision::Proceed
        }
    }

    pub fn consecutive_tool_rounds(&self) -> u32 {
        self.consecutive_tool_rounds
    }

    pub fn intervened(&self) -> bool {
        self.intervened
    }
}

impl Default for TurnState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONSECUTIVE_TOOL_ROUNDS)
    }
}
