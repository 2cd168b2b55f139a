//! Append-only event history.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::events::{AgentEvent, EventKind};
use crate::ids::{AgentId, ResponseId};

/// Ordered record of every event an agent (and its sub-agents) emitted.
///
/// Events are never removed or reordered; queries return borrowed slices in
/// insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentEventList {
    events: Vec<AgentEvent>,
}

impl AgentEventList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event.
    pub fn append(&mut self, event: AgentEvent) {
        self.events.push(event);
    }

    /// Every event, in order.
    pub fn all(&self) -> &[AgentEvent] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The most recent event of `kind`.
    pub fn last_of_kind(&self, kind: EventKind) -> Option<&AgentEvent> {
        self.events.iter().rev().find(|e| e.kind() == kind)
    }

    /// Every event tagged with `response_id`.
    pub fn events_by_response_id(&self, response_id: &ResponseId) -> Vec<&AgentEvent> {
        self.events
            .iter()
            .filter(|e| e.response_id() == Some(response_id))
            .collect()
    }

    /// Events of `agent_id` plus everything emitted while one of its turns was open.
    ///
    /// A turn opens on the agent's `ResponseCreated` and closes on the
    /// `ResponseCompleted` with the same response id. Sub-agent activity runs
    /// inside the parent's open turn, so it is captured here even though it
    /// carries a different agent id.
    pub fn agent_and_sub_agents_events(&self, agent_id: &AgentId) -> Vec<&AgentEvent> {
        let mut open: HashSet<&ResponseId> = HashSet::new();
        let mut out = Vec::new();

        for event in &self.events {
            match event {
                AgentEvent::ResponseCreated {
                    agent_id: owner,
                    response_id,
                } if owner == agent_id => {
                    let _ = open.insert(response_id);
                    out.push(event);
                }
                AgentEvent::ResponseCompleted { response_id, .. } if open.contains(response_id) => {
                    let _ = open.remove(response_id);
                    out.push(event);
                }
                _ if !open.is_empty() || event.agent_id() == agent_id => out.push(event),
                _ => {}
            }
        }
        out
    }

    /// The `CreateSubAgent` event spawned during turn `response_id`.
    pub fn find_create_sub_agent_event(&self, response_id: &ResponseId) -> Option<&AgentEvent> {
        self.events.iter().find(|e| {
            matches!(e, AgentEvent::CreateSubAgent { response_id: r, .. } if r == response_id)
        })
    }

    /// Serialize as a JSON array of tagged events.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.events)
    }

    /// Rebuild from the output of [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let events: Vec<AgentEvent> = serde_json::from_str(json)?;
        Ok(Self { events })
    }
}

impl From<Vec<AgentEvent>> for AgentEventList {
    fn from(events: Vec<AgentEvent>) -> Self {
        Self { events }
    }
}

impl Extend<AgentEvent> for AgentEventList {
    fn extend<I: IntoIterator<Item = AgentEvent>>(&mut self, iter: I) {
        self.events.extend(iter);
    }
}

impl<'a> IntoIterator for &'a AgentEventList {
    type Item = &'a AgentEvent;
    type IntoIter = std::slice::Iter<'a, AgentEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
