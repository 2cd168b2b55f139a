//! Per-call state machine.
//!
//! ```text
//! Idle -> AwaitingResponse -> StreamingText | ToolCallDetected
//!      -> Retrying | Completed | Failed(MaxErrors | MaxCalls | Provider)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why a call ended without completing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The consecutive error budget ran out.
    MaxErrors,
    /// The consecutive call budget ran out.
    MaxCalls,
    /// The LLM service failed.
    Provider,
}

/// Where a call stands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CallState {
    /// Nothing requested yet.
    #[default]
    Idle,
    /// A turn was requested and nothing has streamed back yet.
    AwaitingResponse,
    /// The current turn is producing text.
    StreamingText,
    /// The current turn requested a tool.
    ToolCallDetected,
    /// A tool failed; its error will be fed back in the next turn.
    Retrying,
    /// The call ended normally.
    Completed,
    /// The call ended on a failure.
    Failed(FailureReason),
}

/// Inputs that drive [`CallState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallSignal {
    /// A new LLM turn was requested.
    TurnStarted,
    /// Assistant text arrived.
    TextDelta,
    /// A complete tool call arrived.
    ToolCall,
    /// The tool call succeeded.
    ToolSucceeded,
    /// The tool call failed.
    ToolFailed,
    /// Nothing left to do: a plain answer, or a success that needs no reply.
    Finished,
    /// A budget ran out before the next turn.
    CapReached(FailureReason),
    /// The LLM service failed.
    ProviderFailed,
}

impl CallState {
    /// Whether the call is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// The state after `signal`. Terminal states absorb every signal and
    /// signals that make no sense in the current state leave it unchanged.
    pub fn apply(self, signal: CallSignal) -> Self {
        use CallSignal as S;

        let next = match (self, signal) {
            (s, _) if s.is_terminal() => s,
            (_, S::CapReached(reason)) => Self::Failed(reason),
            (_, S::ProviderFailed) => Self::Failed(FailureReason::Provider),
            (_, S::Finished) => Self::Completed,
            (_, S::TurnStarted) => Self::AwaitingResponse,
            (Self::AwaitingResponse | Self::StreamingText, S::TextDelta) => Self::StreamingText,
            (
                Self::AwaitingResponse
                | Self::StreamingText
                | Self::ToolCallDetected
                | Self::Retrying,
                S::ToolCall,
            )
            | (Self::ToolCallDetected | Self::Retrying, S::ToolSucceeded) => {
                Self::ToolCallDetected
            }
            (Self::ToolCallDetected | Self::Retrying, S::ToolFailed) => Self::Retrying,
            (s, _) => s,
        };
        if next != self {
            debug!(from = %self, to = %next, ?signal, "call state transition");
        }
        next
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingResponse => write!(f, "awaiting_response"),
            Self::StreamingText => write!(f, "streaming_text"),
            Self::ToolCallDetected => write!(f, "tool_call_detected"),
            Self::Retrying => write!(f, "retrying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(FailureReason::MaxErrors) => write!(f, "failed(max_errors)"),
            Self::Failed(FailureReason::MaxCalls) => write!(f, "failed(max_calls)"),
            Self::Failed(FailureReason::Provider) => write!(f, "failed(provider)"),
        }
    }
}

/// What a finished call did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallSummary {
    /// Final state; always terminal.
    pub state: CallState,
    /// LLM turns requested.
    pub turns: u32,
    /// Tool failures counted against the error budget.
    pub consecutive_errors: u32,
    /// Turns counted against the call budget.
    pub consecutive_calls: u32,
    /// Acknowledgement of the last successful tool call.
    pub last_success: Option<String>,
    /// Message of the last failed tool call.
    pub last_failure: Option<String>,
    /// Text of the last completed turn.
    pub final_text: String,
}

impl CallSummary {
    /// Whether at least one tool call succeeded.
    pub fn succeeded(&self) -> bool {
        self.last_success.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(signals: &[CallSignal]) -> CallState {
        signals
            .iter()
            .fold(CallState::default(), |state, signal| state.apply(*signal))
    }

    #[test]
    fn plain_answer_completes() {
        use CallSignal::*;
        assert_eq!(run(&[TurnStarted]), CallState::AwaitingResponse);
        assert_eq!(run(&[TurnStarted, TextDelta]), CallState::StreamingText);
        assert_eq!(
            run(&[TurnStarted, TextDelta, TextDelta, Finished]),
            CallState::Completed
        );
    }

    #[test]
    fn tool_error_retries_then_returns_to_awaiting() {
        use CallSignal::*;
        assert_eq!(
            run(&[TurnStarted, ToolCall, ToolFailed]),
            CallState::Retrying
        );
        assert_eq!(
            run(&[TurnStarted, ToolCall, ToolFailed, TurnStarted]),
            CallState::AwaitingResponse
        );
    }

    #[test]
    fn success_then_reply_turn() {
        use CallSignal::*;
        let state = run(&[TurnStarted, TextDelta, ToolCall, ToolSucceeded]);
        assert_eq!(state, CallState::ToolCallDetected);
        assert_eq!(
            state.apply(TurnStarted).apply(TextDelta).apply(Finished),
            CallState::Completed
        );
    }

    #[test]
    fn caps_and_provider_failures_are_terminal() {
        use CallSignal::*;
        let failed = run(&[
            TurnStarted,
            ToolCall,
            ToolFailed,
            CapReached(FailureReason::MaxErrors),
        ]);
        assert_eq!(failed, CallState::Failed(FailureReason::MaxErrors));
        assert_eq!(failed.apply(TurnStarted), failed);
        assert_eq!(
            run(&[TurnStarted, ProviderFailed, Finished]),
            CallState::Failed(FailureReason::Provider)
        );
    }

    #[test]
    fn nonsensical_signals_are_ignored() {
        assert_eq!(CallState::Idle.apply(CallSignal::ToolSucceeded), CallState::Idle);
        assert_eq!(
            CallState::StreamingText.apply(CallSignal::ToolFailed),
            CallState::StreamingText
        );
    }

    #[test]
    fn display_names() {
        assert_eq!(CallState::ToolCallDetected.to_string(), "tool_call_detected");
        assert_eq!(
            CallState::Failed(FailureReason::MaxCalls).to_string(),
            "failed(max_calls)"
        );
    }
}
