//! Tool dispatch seam between the call loop and concrete agents.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tabula_core::{
    AgentEvent, AgentId, AgentKind, CallId, FunctionErrorKind, QueryInput, ResponseId,
    SuccessPayload,
};
use tabula_llm::ToolSchema;
use tabula_sandbox::SandboxError;

use super::sink::EventSink;
use crate::errors::RuntimeError;

/// A complete tool invocation requested by the LLM.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    /// Turn that requested the call.
    pub response_id: ResponseId,
    /// Invocation id.
    pub call_id: CallId,
    /// Requested function.
    pub function_name: String,
    /// Parsed arguments.
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// A string argument, or `""` when missing or not a string.
    pub fn str_arg(&self, name: &str) -> &str {
        self.arguments.get(name).and_then(Value::as_str).unwrap_or_default()
    }

    /// A list-of-strings argument; non-string entries are skipped.
    pub fn str_list_arg(&self, name: &str) -> Vec<String> {
        self.arguments
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parse raw function-call arguments into a JSON object.
pub fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!(
            "Function arguments must be a JSON object, got: {other}"
        )),
        Err(e) => Err(format!("Invalid JSON in function arguments: {e}")),
    }
}

/// Result of handling one [`ToolCall`].
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutcome {
    /// The tool produced its artifact.
    Success {
        /// Acknowledgement fed back to the LLM.
        function_response: String,
        /// Produced artifact.
        payload: SuccessPayload,
    },
    /// The tool failed; the message is fed back to the LLM.
    Failure {
        /// Failure category.
        kind: FunctionErrorKind,
        /// Explanation.
        message: String,
        /// Script stack trace, for code execution failures.
        stack_trace: Option<String>,
    },
}

impl ToolOutcome {
    /// A failure without a stack trace.
    pub fn failure(kind: FunctionErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
            stack_trace: None,
        }
    }

    /// A missing or empty argument.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::failure(FunctionErrorKind::Validation, message)
    }

    /// A call to a function this agent does not declare.
    pub fn unknown_function(name: &str) -> Self {
        Self::failure(
            FunctionErrorKind::UnknownFunction,
            format!("Unknown function: {name}"),
        )
    }

    /// Whether this is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Text sent back to the LLM for a failure: the message, then the trace.
    pub fn feedback(&self) -> String {
        match self {
            Self::Success {
                function_response, ..
            } => function_response.clone(),
            Self::Failure {
                message,
                stack_trace: Some(trace),
                ..
            } if !trace.is_empty() => format!("{message}\n\nStack trace:\n{trace}"),
            Self::Failure { message, .. } => message.clone(),
        }
    }

    /// The `function_success` / `function_error` event for `call`.
    pub fn to_event(&self, agent_id: &AgentId, call: &ToolCall) -> AgentEvent {
        match self {
            Self::Success {
                function_response,
                payload,
            } => AgentEvent::FunctionSuccess {
                agent_id: agent_id.clone(),
                response_id: call.response_id.clone(),
                call_id: call.call_id.clone(),
                function_response: function_response.clone(),
                payload: payload.clone(),
            },
            Self::Failure {
                kind,
                message,
                stack_trace,
            } => AgentEvent::FunctionError {
                agent_id: agent_id.clone(),
                response_id: call.response_id.clone(),
                call_id: call.call_id.clone(),
                kind: *kind,
                message: message.clone(),
                stack_trace: stack_trace.clone(),
            },
        }
    }
}

impl From<SandboxError> for ToolOutcome {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Execution(e) => Self::Failure {
                kind: FunctionErrorKind::CodeExecution,
                message: e.message,
                stack_trace: Some(e.stack_trace),
            },
            SandboxError::Output { message } => Self::failure(FunctionErrorKind::Output, message),
        }
    }
}

/// What a handler can reach while serving a call.
pub struct ToolContext<'a> {
    /// The agent serving the call.
    pub agent_id: &'a AgentId,
    /// Where intermediate events (code, sub-agent activity) go.
    pub sink: &'a mut dyn EventSink,
}

impl ToolContext<'_> {
    /// Emit an intermediate event.
    pub async fn emit(&mut self, event: AgentEvent) -> Result<(), RuntimeError> {
        self.sink.emit(event).await
    }

    /// Emit a `code` event for `call`.
    pub async fn emit_code(&mut self, call: &ToolCall, code: &str) -> Result<(), RuntimeError> {
        let event = AgentEvent::Code {
            agent_id: self.agent_id.clone(),
            response_id: call.response_id.clone(),
            call_id: call.call_id.clone(),
            code: code.to_string(),
        };
        self.emit(event).await
    }
}

/// The per-agent half of the call loop.
///
/// The loop owns turns, budgets and feedback. A handler declares its tools,
/// writes the instructions for a query, and turns each call into a
/// [`ToolOutcome`], emitting any intermediate events through the context.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// What kind of agent this is.
    fn kind(&self) -> AgentKind;

    /// Declared tools.
    fn tools(&self) -> Vec<ToolSchema>;

    /// System instructions for `input`. Rejects input of the wrong shape.
    fn instructions(&self, input: &QueryInput) -> Result<String, RuntimeError>;

    /// Serve one call.
    async fn handle(
        &self,
        call: &ToolCall,
        input: &QueryInput,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, RuntimeError>;
}
