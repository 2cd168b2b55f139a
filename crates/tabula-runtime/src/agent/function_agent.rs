//! `FunctionAgent`: the function-calling turn loop.
//!
//! Each iteration streams one LLM turn. Text and turn boundaries are
//! forwarded as events, and each complete tool call goes to the agent's
//! [`ToolHandler`]. A success is answered with `{"Result": ...}` so the model
//! can write its closing reply; a failure is answered with the error text and
//! a request to fix the code. Two budgets bound the loop: tool failures and
//! LLM turns. Neither counter ever decreases.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tabula_core::{
    AgentEvent, AgentEventList, AgentId, CallId, ErrorType, FunctionErrorKind, QueryInput,
    ResponseId,
};
use tabula_llm::window::{ensure_response_window, is_synthesized};
use tabula_llm::{InputItem, ProtocolEvent, Provider, ProviderError, ToolSchema, TurnRequest};
use tracing::{debug, info, instrument, warn};

use super::sink::{EventSink, Recorder};
use super::state::{CallSignal, CallState, CallSummary, FailureReason};
use super::tool::{ToolCall, ToolContext, ToolHandler, ToolOutcome, parse_arguments};
use super::{Agent, AgentConfig, UserQuery};
use crate::errors::RuntimeError;

/// Follow-up sent after a failed tool call.
pub const FIX_CODE_PROMPT: &str = "Can you fix the code?";

/// An agent driving one [`ToolHandler`] through the turn loop.
///
/// The agent keeps its event list and continuation token across calls, so a
/// second call continues the same conversation.
pub struct FunctionAgent<H> {
    id: AgentId,
    config: AgentConfig,
    provider: Arc<dyn Provider>,
    handler: H,
    events: AgentEventList,
    previous_response_id: Option<ResponseId>,
}

impl<H: ToolHandler> FunctionAgent<H> {
    /// Create an agent with a fresh id.
    pub fn new(provider: Arc<dyn Provider>, config: AgentConfig, handler: H) -> Self {
        Self::with_id(AgentId::new(), provider, config, handler)
    }

    /// Create an agent with a known id.
    pub fn with_id(
        id: AgentId,
        provider: Arc<dyn Provider>,
        config: AgentConfig,
        handler: H,
    ) -> Self {
        Self {
            id,
            config,
            provider,
            handler,
            events: AgentEventList::new(),
            previous_response_id: None,
        }
    }

    /// Agent id.
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Model parameters and budgets.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The tool handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Everything emitted so far.
    pub fn events(&self) -> &AgentEventList {
        &self.events
    }

    /// Continuation token for the next turn.
    pub fn previous_response_id(&self) -> Option<&ResponseId> {
        self.previous_response_id.as_ref()
    }

    /// Serve one query, emitting every event to `sink` and to the agent's
    /// own list.
    #[instrument(skip_all, fields(agent_id = %self.id, agent_kind = %self.handler.kind()))]
    pub async fn run(
        &mut self,
        query: UserQuery,
        sink: &mut dyn EventSink,
    ) -> Result<CallSummary, RuntimeError> {
        let instructions = self.handler.instructions(&query.input)?;
        let tools = self.handler.tools();

        let Self {
            id,
            config,
            provider,
            handler,
            events,
            previous_response_id,
        } = self;

        let call = CallLoop {
            id,
            config,
            provider,
            handler: &*handler,
            input: &query.input,
            previous_response_id,
            out: Recorder::new(events, sink),
            state: CallState::Idle,
            instructions,
            tools,
        };
        call.run(&query.query).await
    }
}

#[async_trait]
impl<H: ToolHandler> Agent for FunctionAgent<H> {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn events(&self) -> &AgentEventList {
        &self.events
    }

    async fn call(
        &mut self,
        query: UserQuery,
        sink: &mut dyn EventSink,
    ) -> Result<CallSummary, RuntimeError> {
        self.run(query, sink).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Call loop
// ─────────────────────────────────────────────────────────────────────────────

/// What one streamed turn left behind.
#[derive(Default)]
struct TurnRecord {
    text: String,
    success: Option<(CallId, String)>,
    error: Option<(CallId, String, String)>,
}

enum TurnEnd {
    Finished(TurnRecord),
    ProviderFailed(ProviderError),
}

struct CallLoop<'a, H: ?Sized> {
    id: &'a AgentId,
    config: &'a AgentConfig,
    provider: &'a Arc<dyn Provider>,
    handler: &'a H,
    input: &'a QueryInput,
    previous_response_id: &'a mut Option<ResponseId>,
    out: Recorder<'a>,
    state: CallState,
    instructions: String,
    tools: Vec<ToolSchema>,
}

impl<H: ToolHandler + ?Sized> CallLoop<'_, H> {
    fn signal(&mut self, signal: CallSignal) {
        self.state = self.state.apply(signal);
    }

    async fn run(mut self, query: &str) -> Result<CallSummary, RuntimeError> {
        self.out
            .emit(AgentEvent::UserQuery {
                agent_id: self.id.clone(),
                query: query.to_string(),
                input: self.input.clone(),
            })
            .await?;

        let mut summary = CallSummary {
            state: CallState::Idle,
            turns: 0,
            consecutive_errors: 0,
            consecutive_calls: 0,
            last_success: None,
            last_failure: None,
            final_text: String::new(),
        };
        let mut input = vec![InputItem::user(query)];

        loop {
            if summary.consecutive_errors >= self.config.max_consecutive_errors {
                self.terminate(
                    FailureReason::MaxErrors,
                    ErrorType::MaxErrorsReached,
                    format!(
                        "Maximum consecutive errors ({}) reached",
                        self.config.max_consecutive_errors
                    ),
                )
                .await?;
                break;
            }
            if summary.consecutive_calls >= self.config.max_consecutive_calls {
                self.terminate(
                    FailureReason::MaxCalls,
                    ErrorType::MaxCallsReached,
                    format!(
                        "Maximum consecutive calls ({}) reached",
                        self.config.max_consecutive_calls
                    ),
                )
                .await?;
                break;
            }

            summary.consecutive_calls += 1;
            summary.turns += 1;
            self.signal(CallSignal::TurnStarted);

            let request = TurnRequest {
                model: self.config.model.clone(),
                instructions: self.instructions.clone(),
                input: std::mem::take(&mut input),
                temperature: self.config.temperature,
                previous_response_id: self.previous_response_id.clone(),
                tools: self.tools.clone(),
                parallel_tool_calls: false,
            };

            let turn = match self.stream_turn(&request).await? {
                TurnEnd::Finished(turn) => turn,
                TurnEnd::ProviderFailed(error) => {
                    warn!(
                        error = %error,
                        category = error.category(),
                        turn = summary.turns,
                        "LLM provider failed"
                    );
                    self.terminate(
                        FailureReason::Provider,
                        ErrorType::ProviderError,
                        format!("LLM provider error: {error}"),
                    )
                    .await?;
                    break;
                }
            };
            summary.final_text = turn.text;

            if let Some((call_id, function_response)) = turn.success {
                summary.last_success = Some(function_response.clone());
                if self.config.skip_success_response {
                    self.signal(CallSignal::Finished);
                    break;
                }
                let output = json!({ "Result": function_response }).to_string();
                input.push(InputItem::function_output(call_id, output));
                continue;
            }

            if let Some((call_id, message, feedback)) = turn.error {
                summary.consecutive_errors += 1;
                summary.last_failure = Some(message);
                debug!(
                    consecutive_errors = summary.consecutive_errors,
                    max_errors = self.config.max_consecutive_errors,
                    "tool call failed, asking for a fix"
                );
                let output = json!({ "Result": feedback }).to_string();
                input.push(InputItem::function_output(call_id, output));
                input.push(InputItem::user(FIX_CODE_PROMPT));
                continue;
            }

            self.signal(CallSignal::Finished);
            break;
        }

        summary.state = self.state;
        info!(
            state = %summary.state,
            turns = summary.turns,
            consecutive_errors = summary.consecutive_errors,
            "agent call finished"
        );
        Ok(summary)
    }

    async fn terminate(
        &mut self,
        reason: FailureReason,
        error_type: ErrorType,
        message: String,
    ) -> Result<(), RuntimeError> {
        warn!(%error_type, %message, "agent call stopped");
        self.signal(CallSignal::CapReached(reason));
        self.out
            .emit(AgentEvent::Error {
                agent_id: self.id.clone(),
                error_type,
                message,
            })
            .await
    }

    async fn stream_turn(&mut self, request: &TurnRequest) -> Result<TurnEnd, RuntimeError> {
        let mut stream = match self.provider.create_turn(request).await {
            Ok(stream) => ensure_response_window(stream),
            Err(error) => return Ok(TurnEnd::ProviderFailed(error)),
        };

        let mut turn = TurnRecord::default();
        let mut open: Option<ResponseId> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(ProtocolEvent::ResponseCreated { response_id }) => {
                    debug!(%response_id, "turn started");
                    self.continue_from(&response_id);
                    open = Some(response_id.clone());
                    self.out
                        .emit(AgentEvent::ResponseCreated {
                            agent_id: self.id.clone(),
                            response_id,
                        })
                        .await?;
                }
                Ok(ProtocolEvent::TextDelta { delta }) => {
                    let Some(response_id) = open.clone() else {
                        continue;
                    };
                    turn.text.push_str(&delta);
                    self.signal(CallSignal::TextDelta);
                    self.out
                        .emit(AgentEvent::TextDelta {
                            agent_id: self.id.clone(),
                            response_id,
                            delta,
                        })
                        .await?;
                }
                Ok(ProtocolEvent::FunctionCallDone {
                    call_id,
                    name,
                    arguments,
                }) => {
                    let Some(response_id) = open.clone() else {
                        continue;
                    };
                    self.dispatch(response_id, call_id, name, &arguments, &mut turn)
                        .await?;
                }
                Ok(ProtocolEvent::ResponseCompleted { response_id }) => {
                    if open.take().is_some() {
                        self.close_window(response_id.clone(), &turn.text).await?;
                    }
                    self.continue_from(&response_id);
                }
                Err(error) => {
                    if let Some(response_id) = open.take() {
                        self.close_window(response_id, &turn.text).await?;
                    }
                    return Ok(TurnEnd::ProviderFailed(error));
                }
            }
        }

        if let Some(response_id) = open.take() {
            self.close_window(response_id, &turn.text).await?;
        }
        Ok(TurnEnd::Finished(turn))
    }

    /// Chain the next turn onto `response_id` unless it was synthesized locally.
    fn continue_from(&mut self, response_id: &ResponseId) {
        if !is_synthesized(response_id) {
            *self.previous_response_id = Some(response_id.clone());
        }
    }

    async fn close_window(
        &mut self,
        response_id: ResponseId,
        text: &str,
    ) -> Result<(), RuntimeError> {
        self.out
            .emit(AgentEvent::ResponseFullText {
                agent_id: self.id.clone(),
                response_id: response_id.clone(),
                text: text.to_string(),
            })
            .await?;
        self.out
            .emit(AgentEvent::ResponseCompleted {
                agent_id: self.id.clone(),
                response_id,
            })
            .await
    }

    #[instrument(skip_all, fields(function_name = %name, call_id = %call_id))]
    async fn dispatch(
        &mut self,
        response_id: ResponseId,
        call_id: CallId,
        name: String,
        raw_arguments: &str,
        turn: &mut TurnRecord,
    ) -> Result<(), RuntimeError> {
        let parsed = parse_arguments(raw_arguments);
        let call = ToolCall {
            response_id,
            call_id,
            function_name: name,
            arguments: parsed.clone().unwrap_or_default(),
        };
        self.signal(CallSignal::ToolCall);
        self.out
            .emit(AgentEvent::FunctionCall {
                agent_id: self.id.clone(),
                response_id: call.response_id.clone(),
                call_id: call.call_id.clone(),
                function_name: call.function_name.clone(),
                arguments: call.arguments.clone(),
            })
            .await?;

        let outcome = match parsed {
            Err(message) => ToolOutcome::failure(FunctionErrorKind::InvalidArguments, message),
            Ok(_) => {
                let mut ctx = ToolContext {
                    agent_id: self.id,
                    sink: &mut self.out,
                };
                self.handler.handle(&call, self.input, &mut ctx).await?
            }
        };

        match &outcome {
            ToolOutcome::Success {
                function_response, ..
            } => {
                debug!("tool call succeeded");
                self.signal(CallSignal::ToolSucceeded);
                turn.success = Some((call.call_id.clone(), function_response.clone()));
            }
            ToolOutcome::Failure { kind, message, .. } => {
                debug!(%kind, %message, "tool call failed");
                self.signal(CallSignal::ToolFailed);
                turn.error = Some((call.call_id.clone(), message.clone(), outcome.feedback()));
            }
        }
        self.out.emit(outcome.to_event(self.id, &call)).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
