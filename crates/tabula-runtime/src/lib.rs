//! # tabula-runtime
//!
//! Function-calling agents over tables.
//!
//! - [`agent`]: the base call loop ([`FunctionAgent`]), event sinks and the per-call state machine
//! - [`agents`]: the plot, single-table and multi-table transform agents
//! - [`orchestrator`]: the [`TableAgent`] that routes requests to them, plus record and replay
//! - [`errors`]: [`RuntimeError`]

#![deny(unsafe_code)]

pub mod agent;
pub mod agents;
pub mod errors;
pub mod orchestrator;

pub use agent::{
    Agent, AgentConfig, AgentEventStream, CallHandle, CallState, CallSummary, EventSink,
    FunctionAgent, UserQuery, call_agent,
};
pub use agents::{MultiTableHandler, PlotHandler, Specialist, TransformHandler};
pub use errors::RuntimeError;
pub use orchestrator::{Recording, ReplayOutput, TableAgent, record, replay};
