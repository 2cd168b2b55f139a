//! Scripted provider for tests and offline runs.
//!
//! Each call to [`Provider::create_turn`] pops the next [`ScriptedTurn`] and
//! records the request, so tests can assert both what the agent saw and what
//! it sent.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tabula_core::{CallId, ResponseId};

use crate::provider::{
    ProtocolEvent, ProtocolEventStream, Provider, ProviderError, ProviderResult, TurnRequest,
};
use crate::window::ensure_response_window;

/// One canned model turn.
#[derive(Debug)]
pub enum ScriptedTurn {
    /// Events to stream, followed by the normal end of stream.
    Events(Vec<Result<ProtocolEvent, ProviderError>>),
    /// Fail before any event is produced.
    Fail(ProviderError),
}

impl ScriptedTurn {
    fn window(response_id: &ResponseId, body: Vec<ProtocolEvent>) -> Self {
        let mut events = Vec::with_capacity(body.len() + 2);
        events.push(Ok(ProtocolEvent::ResponseCreated {
            response_id: response_id.clone(),
        }));
        events.extend(body.into_iter().map(Ok));
        events.push(Ok(ProtocolEvent::ResponseCompleted {
            response_id: response_id.clone(),
        }));
        Self::Events(events)
    }

    /// A plain text answer, streamed as one delta per word.
    pub fn text(text: &str) -> Self {
        let mut deltas = Vec::new();
        let mut rest = text;
        while let Some(pos) = rest.find(' ') {
            deltas.push(ProtocolEvent::TextDelta {
                delta: rest[..=pos].to_string(),
            });
            rest = &rest[pos + 1..];
        }
        if !rest.is_empty() {
            deltas.push(ProtocolEvent::TextDelta {
                delta: rest.to_string(),
            });
        }
        Self::window(&scripted_response_id(), deltas)
    }

    /// A single function call with JSON arguments.
    pub fn function_call(name: &str, arguments: &Value) -> Self {
        Self::function_call_raw(name, &arguments.to_string())
    }

    /// A single function call with an arbitrary argument string.
    pub fn function_call_raw(name: &str, arguments: &str) -> Self {
        Self::window(
            &scripted_response_id(),
            vec![ProtocolEvent::FunctionCallDone {
                call_id: CallId::from(format!("call_{}", CallId::new())),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        )
    }

    /// Text followed by a function call in the same turn.
    pub fn text_then_call(text: &str, name: &str, arguments: &Value) -> Self {
        Self::window(
            &scripted_response_id(),
            vec![
                ProtocolEvent::TextDelta {
                    delta: text.to_string(),
                },
                ProtocolEvent::FunctionCallDone {
                    call_id: CallId::from(format!("call_{}", CallId::new())),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            ],
        )
    }

    /// A turn whose request fails.
    pub fn failure(error: ProviderError) -> Self {
        Self::Fail(error)
    }
}

fn scripted_response_id() -> ResponseId {
    ResponseId::from(format!("resp_{}", ResponseId::new()))
}

/// Provider that replays [`ScriptedTurn`]s in order.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedProvider {
    /// Create a provider that will play `turns` in order.
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another turn.
    pub fn push(&self, turn: ScriptedTurn) {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(turn);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Turns not yet played.
    pub fn remaining(&self) -> usize {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_turn(&self, request: &TurnRequest) -> ProviderResult<ProtocolEventStream> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let turn = self
            .turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match turn {
            Some(ScriptedTurn::Events(events)) => Ok(ensure_response_window(Box::pin(
                futures::stream::iter(events),
            ))),
            Some(ScriptedTurn::Fail(err)) => Err(err),
            None => Err(ProviderError::Other {
                message: "scripted provider has no turns left".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::InputItem;
    use futures::StreamExt;

    fn request() -> TurnRequest {
        TurnRequest {
            model: "m".into(),
            instructions: String::new(),
            input: vec![InputItem::user("hi")],
            temperature: 0.0,
            previous_response_id: None,
            tools: Vec::new(),
            parallel_tool_calls: false,
        }
    }

    #[tokio::test]
    async fn plays_turns_in_order_and_records_requests() {
        let provider = ScriptedProvider::new([
            ScriptedTurn::text("Hello there"),
            ScriptedTurn::function_call("f", &serde_json::json!({"a": 1})),
        ]);

        let first: Vec<_> = provider
            .create_turn(&request())
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(first.len(), 4);
        assert_eq!(
            first[1],
            ProtocolEvent::TextDelta {
                delta: "Hello ".into()
            }
        );

        let second: Vec<_> = provider
            .create_turn(&request())
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;
        assert!(matches!(&second[1], ProtocolEvent::FunctionCallDone { arguments, .. } if arguments == r#"{"a":1}"#));

        assert_eq!(provider.requests().len(), 2);
        assert_eq!(provider.remaining(), 0);
        assert!(provider.create_turn(&request()).await.is_err());
    }
}
