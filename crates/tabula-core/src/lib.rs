//! # tabula-core
//!
//! Foundation types shared by every tabula crate:
//!
//! - [`ids`]: branded id newtypes (`AgentId`, `ResponseId`, `CallId`)
//! - [`table`]: the immutable [`Table`] model, structural descriptions and CSV I/O
//! - [`figure`]: Plotly-compatible [`Figure`] specification
//! - [`events`]: the [`AgentEvent`] tagged union exchanged with consumers
//! - [`event_list`]: the append-only [`AgentEventList`] with response/agent slicing
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod event_list;
pub mod events;
pub mod figure;
pub mod ids;
pub mod logging;
pub mod table;

pub use event_list::AgentEventList;
pub use events::{
    AgentEvent, AgentKind, ErrorType, EventKind, FunctionErrorKind, QueryInput, SuccessPayload,
};
pub use figure::{Figure, Layout, Trace, TraceKind};
pub use logging::{init_json_subscriber, init_subscriber};
pub use ids::{AgentId, CallId, ResponseId};
pub use table::{Cell, Column, DataType, Table, TableError, TableSet};
