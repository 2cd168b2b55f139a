//! Running a call on its own task.
//!
//! [`call_agent`] moves the agent onto a tokio task and hands back the event
//! stream plus a [`CallHandle`] that returns the agent when the call is over.
//! Dropping the stream closes the channel; the call notices at its next
//! emission and ends with [`RuntimeError::Cancelled`].

use std::pin::Pin;

use futures::Stream;
use tabula_core::AgentEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::sink::ChannelSink;
use super::state::CallSummary;
use super::{Agent, UserQuery};
use crate::errors::RuntimeError;

/// Events of one call, in emission order.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Completion side of a spawned call.
pub struct CallHandle<A> {
    task: JoinHandle<(A, Result<CallSummary, RuntimeError>)>,
}

impl<A> CallHandle<A> {
    /// Wait for the call and take the agent back.
    pub async fn finish(self) -> Result<(A, Result<CallSummary, RuntimeError>), RuntimeError> {
        self.task
            .await
            .map_err(|e| RuntimeError::Internal(format!("agent task failed: {e}")))
    }
}

/// Spawn `agent.call(query)` and stream its events through a channel of
/// `buffer` slots.
pub fn call_agent<A>(mut agent: A, query: UserQuery, buffer: usize) -> (AgentEventStream, CallHandle<A>)
where
    A: Agent + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let task = tokio::spawn(async move {
        let mut sink = ChannelSink::new(tx);
        let result = agent.call(query, &mut sink).await;
        if let Err(e) = &result {
            debug!(error = %e, category = e.category(), "agent call ended early");
        }
        (agent, result)
    });
    (Box::pin(ReceiverStream::new(rx)), CallHandle { task })
}
