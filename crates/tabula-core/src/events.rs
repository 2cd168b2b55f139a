//! Agent event union.
//!
//! Every observable step of an agent call is an [`AgentEvent`]. Events are
//! yielded to the consumer in emission order and appended to the emitting
//! agent's [`AgentEventList`](crate::AgentEventList); the list is the complete
//! record of the conversation.
//!
//! Correlation ids follow a fixed scheme:
//! - every event carries the `agent_id` of the agent that produced it
//! - turn-scoped events carry the `response_id` of their LLM turn
//! - tool-scoped events additionally carry the `call_id` of the tool invocation
//!
//! The JSON form is internally tagged by `"type"`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::figure::Figure;
use crate::ids::{AgentId, CallId, ResponseId};
use crate::table::{Table, TableSet};

/// Which specialized behaviour an agent implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Orchestrator routing to the specialized agents.
    TableAgent,
    /// Figure generation from one table.
    Plot,
    /// Single-table transform.
    TableTransform,
    /// Multi-table transform.
    MultiTableTransform,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableAgent => write!(f, "table_agent"),
            Self::Plot => write!(f, "plot"),
            Self::TableTransform => write!(f, "table_transform"),
            Self::MultiTableTransform => write!(f, "multi_table_transform"),
        }
    }
}

/// Why a tool invocation failed.
///
/// Every kind is fed back to the LLM and consumes one error-budget slot; the
/// kind lets consumers tell argument problems from script failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionErrorKind {
    /// Missing or empty required argument, or unknown table name.
    Validation,
    /// The argument payload was not a JSON object.
    InvalidArguments,
    /// The LLM called a function this agent does not declare.
    UnknownFunction,
    /// The script failed to parse or raised during evaluation.
    CodeExecution,
    /// The script ran but did not produce the required output.
    Output,
    /// A delegated sub-agent finished without success.
    SubAgent,
}

impl fmt::Display for FunctionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::InvalidArguments => write!(f, "invalid_arguments"),
            Self::UnknownFunction => write!(f, "unknown_function"),
            Self::CodeExecution => write!(f, "code_execution"),
            Self::Output => write!(f, "output"),
            Self::SubAgent => write!(f, "sub_agent"),
        }
    }
}

/// Terminal error categories for a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The consecutive error budget ran out.
    MaxErrorsReached,
    /// The consecutive call budget ran out.
    MaxCallsReached,
    /// The LLM service failed and retries were exhausted.
    ProviderError,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxErrorsReached => write!(f, "max_errors_reached"),
            Self::MaxCallsReached => write!(f, "max_calls_reached"),
            Self::ProviderError => write!(f, "provider_error"),
        }
    }
}

/// Result carried by a successful tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuccessPayload {
    /// A generated figure.
    Plot {
        /// Human-readable plot title.
        plot_name: String,
        /// The figure.
        figure: Arc<Figure>,
        /// Script that produced it.
        code: String,
    },
    /// One new table.
    TableTransform {
        /// Name the new table is registered under.
        table_name: String,
        /// The table.
        table: Arc<Table>,
        /// Script that produced it.
        code: String,
    },
    /// Several new tables.
    MultiTableTransform {
        /// New tables by name.
        tables: TableSet,
        /// Script that produced them.
        code: String,
    },
    /// Orchestrator acknowledgement that a delegated sub-agent succeeded.
    SubAgent {
        /// The sub-agent that did the work.
        sub_agent_id: AgentId,
    },
}

/// Tables bound to one agent invocation.
///
/// This is an immutable snapshot: a sub-agent resolves names against it
/// without reaching back into its parent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryInput {
    /// One table (plot agent).
    Table {
        /// The table.
        table: Arc<Table>,
        /// Name of the table in the caller's table set.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table_key: Option<String>,
    },
    /// One table plus naming hints (single-table transform agent).
    TableTransform {
        /// The table.
        table: Arc<Table>,
        /// Name of the input table.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table_name: Option<String>,
        /// Name the output must be registered under.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_table_name: Option<String>,
    },
    /// Several named tables (orchestrator, multi-table transform agent).
    Tables {
        /// Tables by name.
        tables: TableSet,
        /// Expected output names.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_table_names: Option<Vec<String>>,
    },
}

impl QueryInput {
    /// Names of the bound tables, where known.
    pub fn table_keys(&self) -> Vec<String> {
        match self {
            Self::Table { table_key, .. } => table_key.iter().cloned().collect(),
            Self::TableTransform { table_name, .. } => table_name.iter().cloned().collect(),
            Self::Tables { tables, .. } => tables.keys().cloned().collect(),
        }
    }
}

/// Discriminant of [`AgentEvent`], matching its `"type"` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`AgentEvent::TextDelta`].
    TextDelta,
    /// See [`AgentEvent::ResponseCreated`].
    ResponseCreated,
    /// See [`AgentEvent::ResponseCompleted`].
    ResponseCompleted,
    /// See [`AgentEvent::ResponseFullText`].
    ResponseFullText,
    /// See [`AgentEvent::FunctionCall`].
    FunctionCall,
    /// See [`AgentEvent::FunctionError`].
    FunctionError,
    /// See [`AgentEvent::FunctionSuccess`].
    FunctionSuccess,
    /// See [`AgentEvent::Code`].
    Code,
    /// See [`AgentEvent::UserQuery`].
    UserQuery,
    /// See [`AgentEvent::CreateSubAgent`].
    CreateSubAgent,
    /// See [`AgentEvent::Error`].
    Error,
}

impl EventKind {
    /// The serialized `"type"` tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextDelta => "text_delta",
            Self::ResponseCreated => "response_created",
            Self::ResponseCompleted => "response_completed",
            Self::ResponseFullText => "response_full_text",
            Self::FunctionCall => "function_call",
            Self::FunctionError => "function_error",
            Self::FunctionSuccess => "function_success",
            Self::Code => "code",
            Self::UserQuery => "user_query",
            Self::CreateSubAgent => "create_sub_agent",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an agent call emits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental assistant text.
    TextDelta {
        /// Emitting agent.
        agent_id: AgentId,
        /// LLM turn.
        response_id: ResponseId,
        /// New text fragment.
        delta: String,
    },

    /// An LLM turn started. Opens the window of events sharing `response_id`.
    ResponseCreated {
        /// Emitting agent.
        agent_id: AgentId,
        /// LLM turn.
        response_id: ResponseId,
    },

    /// An LLM turn finished. Closes the window opened by `ResponseCreated`.
    ResponseCompleted {
        /// Emitting agent.
        agent_id: AgentId,
        /// LLM turn.
        response_id: ResponseId,
    },

    /// All text of one turn, emitted just before its `ResponseCompleted`.
    ResponseFullText {
        /// Emitting agent.
        agent_id: AgentId,
        /// LLM turn.
        response_id: ResponseId,
        /// Accumulated text (may be empty).
        text: String,
    },

    /// The LLM requested a tool invocation and its arguments are complete.
    FunctionCall {
        /// Emitting agent.
        agent_id: AgentId,
        /// LLM turn.
        response_id: ResponseId,
        /// Tool invocation.
        call_id: CallId,
        /// Declared function name.
        function_name: String,
        /// Parsed JSON arguments.
        arguments: Map<String, Value>,
    },

    /// A tool invocation failed.
    FunctionError {
        /// Emitting agent.
        agent_id: AgentId,
        /// LLM turn.
        response_id: ResponseId,
        /// Tool invocation.
        call_id: CallId,
        /// Failure category.
        kind: FunctionErrorKind,
        /// Message fed back to the LLM.
        message: String,
        /// Script stack trace for code execution failures.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack_trace: Option<String>,
    },

    /// A tool invocation succeeded.
    FunctionSuccess {
        /// Emitting agent.
        agent_id: AgentId,
        /// LLM turn.
        response_id: ResponseId,
        /// Tool invocation.
        call_id: CallId,
        /// Acknowledgement fed back to the LLM.
        function_response: String,
        /// Produced artifact.
        payload: SuccessPayload,
    },

    /// The script about to be executed for a tool invocation.
    Code {
        /// Emitting agent.
        agent_id: AgentId,
        /// LLM turn.
        response_id: ResponseId,
        /// Tool invocation.
        call_id: CallId,
        /// Script source.
        code: String,
    },

    /// The request that started an agent call.
    UserQuery {
        /// Agent receiving the query.
        agent_id: AgentId,
        /// Natural-language request.
        query: String,
        /// Bound tables.
        input: QueryInput,
    },

    /// A sub-agent was spawned to serve a parent's tool invocation.
    CreateSubAgent {
        /// The new sub-agent.
        agent_id: AgentId,
        /// The delegating agent.
        parent_agent_id: AgentId,
        /// Parent's LLM turn.
        response_id: ResponseId,
        /// Parent's tool invocation.
        call_id: CallId,
        /// What the sub-agent does.
        sub_agent_kind: AgentKind,
    },

    /// Terminal, non-fatal failure of a call.
    Error {
        /// Emitting agent.
        agent_id: AgentId,
        /// Category.
        error_type: ErrorType,
        /// Human-readable explanation.
        message: String,
    },
}

impl AgentEvent {
    /// Discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TextDelta { .. } => EventKind::TextDelta,
            Self::ResponseCreated { .. } => EventKind::ResponseCreated,
            Self::ResponseCompleted { .. } => EventKind::ResponseCompleted,
            Self::ResponseFullText { .. } => EventKind::ResponseFullText,
            Self::FunctionCall { .. } => EventKind::FunctionCall,
            Self::FunctionError { .. } => EventKind::FunctionError,
            Self::FunctionSuccess { .. } => EventKind::FunctionSuccess,
            Self::Code { .. } => EventKind::Code,
            Self::UserQuery { .. } => EventKind::UserQuery,
            Self::CreateSubAgent { .. } => EventKind::CreateSubAgent,
            Self::Error { .. } => EventKind::Error,
        }
    }

    /// The agent that produced the event (the new sub-agent for `CreateSubAgent`).
    pub fn agent_id(&self) -> &AgentId {
        match self {
            Self::TextDelta { agent_id, .. }
            | Self::ResponseCreated { agent_id, .. }
            | Self::ResponseCompleted { agent_id, .. }
            | Self::ResponseFullText { agent_id, .. }
            | Self::FunctionCall { agent_id, .. }
            | Self::FunctionError { agent_id, .. }
            | Self::FunctionSuccess { agent_id, .. }
            | Self::Code { agent_id, .. }
            | Self::UserQuery { agent_id, .. }
            | Self::CreateSubAgent { agent_id, .. }
            | Self::Error { agent_id, .. } => agent_id,
        }
    }

    /// The LLM turn the event belongs to, if turn-scoped.
    pub fn response_id(&self) -> Option<&ResponseId> {
        match self {
            Self::TextDelta { response_id, .. }
            | Self::ResponseCreated { response_id, .. }
            | Self::ResponseCompleted { response_id, .. }
            | Self::ResponseFullText { response_id, .. }
            | Self::FunctionCall { response_id, .. }
            | Self::FunctionError { response_id, .. }
            | Self::FunctionSuccess { response_id, .. }
            | Self::Code { response_id, .. }
            | Self::CreateSubAgent { response_id, .. } => Some(response_id),
            Self::UserQuery { .. } | Self::Error { .. } => None,
        }
    }

    /// The tool invocation the event belongs to, if tool-scoped.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::FunctionCall { call_id, .. }
            | Self::FunctionError { call_id, .. }
            | Self::FunctionSuccess { call_id, .. }
            | Self::Code { call_id, .. }
            | Self::CreateSubAgent { call_id, .. } => Some(call_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn table() -> Arc<Table> {
        Arc::new(Table::new(vec![Column::new("a", vec![1.into(), 2.5.into()])]).unwrap())
    }

    fn sample_events() -> Vec<AgentEvent> {
        let agent = AgentId::from("agent-1");
        let sub = AgentId::from("agent-2");
        let rid = ResponseId::from("resp_1");
        let cid = CallId::from("call_1");
        let mut tables = TableSet::new();
        let _ = tables.insert("t".into(), table());
        let mut arguments = Map::new();
        let _ = arguments.insert("table_name".into(), Value::from("t"));
        vec![
            AgentEvent::UserQuery {
                agent_id: agent.clone(),
                query: "plot a".into(),
                input: QueryInput::Tables {
                    tables: tables.clone(),
                    output_table_names: None,
                },
            },
            AgentEvent::ResponseCreated {
                agent_id: agent.clone(),
                response_id: rid.clone(),
            },
            AgentEvent::TextDelta {
                agent_id: agent.clone(),
                response_id: rid.clone(),
                delta: "hi".into(),
            },
            AgentEvent::FunctionCall {
                agent_id: agent.clone(),
                response_id: rid.clone(),
                call_id: cid.clone(),
                function_name: "generate_plot".into(),
                arguments,
            },
            AgentEvent::CreateSubAgent {
                agent_id: sub.clone(),
                parent_agent_id: agent.clone(),
                response_id: rid.clone(),
                call_id: cid.clone(),
                sub_agent_kind: AgentKind::Plot,
            },
            AgentEvent::Code {
                agent_id: sub.clone(),
                response_id: rid.clone(),
                call_id: cid.clone(),
                code: "(def fig (figure))".into(),
            },
            AgentEvent::FunctionError {
                agent_id: sub.clone(),
                response_id: rid.clone(),
                call_id: cid.clone(),
                kind: FunctionErrorKind::CodeExecution,
                message: "boom".into(),
                stack_trace: Some("at (def ...)".into()),
            },
            AgentEvent::FunctionSuccess {
                agent_id: sub,
                response_id: rid.clone(),
                call_id: cid.clone(),
                function_response: "Successfully transformed the multiple tables.".into(),
                payload: SuccessPayload::MultiTableTransform {
                    tables,
                    code: "(def result_tables (dict))".into(),
                },
            },
            AgentEvent::ResponseFullText {
                agent_id: agent.clone(),
                response_id: rid.clone(),
                text: "done".into(),
            },
            AgentEvent::ResponseCompleted {
                agent_id: agent.clone(),
                response_id: rid,
            },
            AgentEvent::Error {
                agent_id: agent,
                error_type: ErrorType::MaxCallsReached,
                message: "Maximum consecutive calls (10) reached".into(),
            },
        ]
    }

    #[test]
    fn serialized_tags_match_kind() {
        for event in sample_events() {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.kind().as_str());
        }
    }

    #[test]
    fn event_sequence_round_trips() {
        let events = sample_events();
        let json = serde_json::to_string(&events).unwrap();
        let back: Vec<AgentEvent> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, events);
    }

    #[test]
    fn correlation_accessors() {
        let events = sample_events();
        assert!(events[0].response_id().is_none());
        assert_eq!(events[1].response_id().unwrap().as_str(), "resp_1");
        assert!(events[1].call_id().is_none());
        assert_eq!(events[3].call_id().unwrap().as_str(), "call_1");
        assert_eq!(events[4].agent_id().as_str(), "agent-2");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let event = AgentEvent::FunctionError {
            agent_id: AgentId::from("a"),
            response_id: ResponseId::from("r"),
            call_id: CallId::from("c"),
            kind: FunctionErrorKind::Validation,
            message: "No code provided in function arguments".into(),
            stack_trace: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("stack_trace").is_none());
        assert_eq!(json["kind"], "validation");
    }

    #[test]
    fn table_keys_by_input_kind() {
        let input = QueryInput::TableTransform {
            table: table(),
            table_name: Some("sales".into()),
            output_table_name: None,
        };
        assert_eq!(input.table_keys(), vec!["sales".to_string()]);
    }
}
