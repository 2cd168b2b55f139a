//! Event sinks.
//!
//! An agent never yields directly to its consumer. It emits into an
//! [`EventSink`], and sinks chain: a sub-agent's [`Recorder`] appends to the
//! sub-agent's list and forwards to its parent's recorder, which appends to
//! the parent's list and forwards to the [`ChannelSink`] the consumer reads.

use async_trait::async_trait;
use tabula_core::{AgentEvent, AgentEventList};
use tokio::sync::mpsc;
use tracing::trace;

use crate::errors::RuntimeError;

/// Destination for agent events.
#[async_trait]
pub trait EventSink: Send {
    /// Deliver one event. Fails with [`RuntimeError::Cancelled`] once the
    /// consumer is gone.
    async fn emit(&mut self, event: AgentEvent) -> Result<(), RuntimeError>;
}

/// Bounded channel to the consumer.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<AgentEvent>,
}

impl ChannelSink {
    /// Wrap the sending half of a channel.
    pub fn new(tx: mpsc::Sender<AgentEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&mut self, event: AgentEvent) -> Result<(), RuntimeError> {
        self.tx.send(event).await.map_err(|_| RuntimeError::Cancelled)
    }
}

/// Sink that drops everything. Used when only the agent's own list matters.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&mut self, _event: AgentEvent) -> Result<(), RuntimeError> {
        Ok(())
    }
}

#[async_trait]
impl EventSink for Vec<AgentEvent> {
    async fn emit(&mut self, event: AgentEvent) -> Result<(), RuntimeError> {
        self.push(event);
        Ok(())
    }
}

/// Appends every event to an [`AgentEventList`], then forwards it.
pub struct Recorder<'a> {
    list: &'a mut AgentEventList,
    next: &'a mut dyn EventSink,
}

impl<'a> Recorder<'a> {
    /// Record into `list` and forward to `next`.
    pub fn new(list: &'a mut AgentEventList, next: &'a mut dyn EventSink) -> Self {
        Self { list, next }
    }

    /// Events recorded so far (including earlier calls).
    pub fn list(&self) -> &AgentEventList {
        self.list
    }
}

#[async_trait]
impl EventSink for Recorder<'_> {
    async fn emit(&mut self, event: AgentEvent) -> Result<(), RuntimeError> {
        trace!(kind = %event.kind(), agent_id = %event.agent_id(), "emit");
        self.list.append(event.clone());
        self.next.emit(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tabula_core::AgentId;

    fn event(text: &str) -> AgentEvent {
        AgentEvent::TextDelta {
            agent_id: AgentId::from("agent"),
            response_id: "resp".into(),
            delta: text.into(),
        }
    }

    #[tokio::test]
    async fn recorders_chain_in_order() {
        let mut consumer: Vec<AgentEvent> = Vec::new();
        let mut parent_list = AgentEventList::new();
        let mut child_list = AgentEventList::new();
        {
            let mut parent = Recorder::new(&mut parent_list, &mut consumer);
            parent.emit(event("a")).await.unwrap();
            let mut child = Recorder::new(&mut child_list, &mut parent);
            child.emit(event("b")).await.unwrap();
        }
        assert_eq!(consumer, vec![event("a"), event("b")]);
        assert_eq!(parent_list.len(), 2);
        assert_eq!(child_list.all(), &[event("b")]);
    }

    #[tokio::test]
    async fn closed_channel_cancels() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        drop(rx);
        assert_matches!(sink.emit(event("x")).await, Err(RuntimeError::Cancelled));
    }

    #[tokio::test]
    async fn recorder_keeps_event_even_when_cancelled() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut channel = ChannelSink::new(tx);
        let mut list = AgentEventList::new();
        let mut recorder = Recorder::new(&mut list, &mut channel);
        assert!(recorder.emit(event("x")).await.is_err());
        assert_eq!(recorder.list().len(), 1);
    }
}
