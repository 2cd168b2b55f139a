//! Base agent: the call loop and everything it is built from.
//!
//! - [`function_agent`]: [`FunctionAgent`], the turn loop with its error and call budgets
//! - [`tool`]: the [`ToolHandler`] seam concrete agents implement
//! - [`sink`]: event sinks (channel, recorder chain)
//! - [`state`]: the per-call [`CallState`] machine
//! - [`run`]: spawn a call and consume it as a stream

pub mod function_agent;
pub mod run;
pub mod sink;
pub mod state;
pub mod tool;

pub use function_agent::FunctionAgent;
pub use run::{AgentEventStream, CallHandle, call_agent};
pub use sink::{ChannelSink, EventSink, NullSink, Recorder};
pub use state::{CallSignal, CallState, CallSummary, FailureReason};
pub use tool::{ToolCall, ToolContext, ToolHandler, ToolOutcome};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tabula_core::{AgentEventList, AgentId, QueryInput};
use tabula_settings::AgentSettings;

use crate::errors::RuntimeError;

/// Model parameters and budgets for one agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Tool failures allowed before the call gives up.
    pub max_consecutive_errors: u32,
    /// LLM turns allowed per call.
    pub max_consecutive_calls: u32,
    /// End the call right after the first tool success instead of asking the
    /// LLM for a closing reply.
    pub skip_success_response: bool,
}

impl AgentConfig {
    /// Config for a delegated sub-agent: same model, and no closing reply,
    /// since the delegating agent reports completion itself.
    pub fn for_sub_agent(&self) -> Self {
        Self {
            skip_success_response: true,
            ..self.clone()
        }
    }
}

impl From<&AgentSettings> for AgentConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_consecutive_errors: settings.max_consecutive_errors,
            max_consecutive_calls: settings.max_consecutive_calls,
            skip_success_response: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

/// One request to an agent: the text plus the tables it may use.
#[derive(Clone, Debug, PartialEq)]
pub struct UserQuery {
    /// Natural-language request.
    pub query: String,
    /// Bound tables.
    pub input: QueryInput,
}

impl UserQuery {
    /// Build a query.
    pub fn new(query: impl Into<String>, input: QueryInput) -> Self {
        Self {
            query: query.into(),
            input,
        }
    }
}

/// Anything that can serve a [`UserQuery`] by emitting events.
#[async_trait]
pub trait Agent: Send {
    /// Stable id, carried by every event the agent emits.
    fn id(&self) -> &AgentId;

    /// Everything emitted so far, including sub-agent activity.
    fn events(&self) -> &AgentEventList;

    /// Serve one query. Agent-level failures are events; `Err` means the
    /// consumer went away or the query cannot be served at all.
    async fn call(
        &mut self,
        query: UserQuery,
        sink: &mut dyn EventSink,
    ) -> Result<CallSummary, RuntimeError>;
}
