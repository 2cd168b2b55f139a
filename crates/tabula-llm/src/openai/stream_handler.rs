//! # `OpenAI` Stream Handler
//!
//! SSE event state machine for the Responses API.
//!
//! Converts Responses API events into [`ProtocolEvent`]s:
//! - `response.created` → `ResponseCreated`
//! - `response.output_text.delta` → `TextDelta`
//! - `response.output_item.done` (`function_call`) → `FunctionCallDone`
//! - `response.completed` / `response.incomplete` → `ResponseCompleted`
//! - `response.failed` / `error` → [`ProviderError::Api`]

use std::collections::HashSet;

use tabula_core::{CallId, ResponseId};
use tracing::debug;

use super::types::ResponsesSseEvent;
use crate::provider::{ProtocolEvent, ProviderError};

/// Per-turn accumulation state.
#[derive(Clone, Debug, Default)]
pub struct StreamState {
    /// Id from `response.created`, if seen.
    pub response_id: Option<String>,
    /// All text deltas so far.
    pub accumulated_text: String,
    /// Function calls already emitted.
    pub emitted_calls: HashSet<String>,
}

/// Create a fresh stream state.
#[must_use]
pub fn create_stream_state() -> StreamState {
    StreamState::default()
}

/// Process one SSE event and return the resulting protocol events.
pub fn process_stream_event(
    event: &ResponsesSseEvent,
    state: &mut StreamState,
) -> Vec<Result<ProtocolEvent, ProviderError>> {
    let mut events = Vec::new();

    match event.event_type.as_str() {
        "response.created" => {
            if let Some(id) = event.response.as_ref().map(|r| r.id.as_str()).filter(|id| !id.is_empty()) {
                state.response_id = Some(id.to_string());
                events.push(Ok(ProtocolEvent::ResponseCreated {
                    response_id: ResponseId::from(id),
                }));
            }
        }

        "response.output_text.delta" => {
            if let Some(delta) = event.delta.as_ref().filter(|d| !d.is_empty()) {
                state.accumulated_text.push_str(delta);
                events.push(Ok(ProtocolEvent::TextDelta {
                    delta: delta.clone(),
                }));
            }
        }

        "response.output_item.done" => {
            let Some(item) = &event.item else {
                return events;
            };
            if item.item_type != "function_call" {
                return events;
            }
            let Some(call_id) = item.call_id.as_ref().or(item.id.as_ref()) else {
                debug!("function_call item without call_id, skipping");
                return events;
            };
            if state.emitted_calls.insert(call_id.clone()) {
                events.push(Ok(ProtocolEvent::FunctionCallDone {
                    call_id: CallId::from(call_id.as_str()),
                    name: item.name.clone().unwrap_or_default(),
                    arguments: item.arguments.clone().unwrap_or_default(),
                }));
            }
        }

        "response.completed" | "response.incomplete" => {
            let id = event
                .response
                .as_ref()
                .map(|r| r.id.clone())
                .filter(|id| !id.is_empty())
                .or_else(|| state.response_id.clone());
            if let Some(id) = id {
                events.push(Ok(ProtocolEvent::ResponseCompleted {
                    response_id: ResponseId::from(id),
                }));
            }
        }

        "response.failed" => {
            let error = event.response.as_ref().and_then(|r| r.error.clone());
            events.push(Err(ProviderError::Api {
                status: 0,
                message: error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "response failed".to_string()),
                code: error.and_then(|e| e.code),
                retryable: false,
            }));
        }

        "error" => {
            events.push(Err(ProviderError::Api {
                status: 0,
                message: event
                    .message
                    .clone()
                    .unwrap_or_else(|| "stream error".to_string()),
                code: event.code.clone(),
                retryable: false,
            }));
        }

        _ => {}
    }

    events
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn parse(json: &str) -> ResponsesSseEvent {
        serde_json::from_str(json).unwrap()
    }

    fn ok(events: Vec<Result<ProtocolEvent, ProviderError>>) -> Vec<ProtocolEvent> {
        events.into_iter().map(Result::unwrap).collect()
    }

    #[test]
    fn full_text_turn() {
        let mut state = create_stream_state();
        let mut out = Vec::new();
        for line in [
            r#"{"type":"response.created","response":{"id":"resp_1","status":"in_progress"}}"#,
            r#"{"type":"response.output_item.added","item":{"type":"message","id":"msg_1"}}"#,
            r#"{"type":"response.output_text.delta","delta":"Hel"}"#,
            r#"{"type":"response.output_text.delta","delta":"lo"}"#,
            r#"{"type":"response.output_text.done","text":"Hello"}"#,
            r#"{"type":"response.completed","response":{"id":"resp_1","status":"completed"}}"#,
        ] {
            out.extend(ok(process_stream_event(&parse(line), &mut state)));
        }
        assert_eq!(
            out,
            vec![
                ProtocolEvent::ResponseCreated {
                    response_id: "resp_1".into()
                },
                ProtocolEvent::TextDelta { delta: "Hel".into() },
                ProtocolEvent::TextDelta { delta: "lo".into() },
                ProtocolEvent::ResponseCompleted {
                    response_id: "resp_1".into()
                },
            ]
        );
        assert_eq!(state.accumulated_text, "Hello");
    }

    #[test]
    fn function_call_emitted_once_on_done() {
        let mut state = create_stream_state();
        let added = parse(
            r#"{"type":"response.output_item.added","item":{"type":"function_call","call_id":"call_1","name":"generate_plot","arguments":""}}"#,
        );
        assert!(process_stream_event(&added, &mut state).is_empty());

        let done = parse(
            r#"{"type":"response.output_item.done","item":{"type":"function_call","call_id":"call_1","name":"generate_plot","arguments":"{\"table_name\":\"t\"}"}}"#,
        );
        let out = ok(process_stream_event(&done, &mut state));
        assert_eq!(
            out,
            vec![ProtocolEvent::FunctionCallDone {
                call_id: "call_1".into(),
                name: "generate_plot".into(),
                arguments: r#"{"table_name":"t"}"#.into(),
            }]
        );
        assert!(process_stream_event(&done, &mut state).is_empty());
    }

    #[test]
    fn completed_without_id_uses_created_id() {
        let mut state = create_stream_state();
        let _ = process_stream_event(
            &parse(r#"{"type":"response.created","response":{"id":"resp_7"}}"#),
            &mut state,
        );
        let out = ok(process_stream_event(
            &parse(r#"{"type":"response.completed","response":{}}"#),
            &mut state,
        ));
        assert_eq!(
            out,
            vec![ProtocolEvent::ResponseCompleted {
                response_id: "resp_7".into()
            }]
        );
    }

    #[test]
    fn failed_response_is_error() {
        let mut state = create_stream_state();
        let out = process_stream_event(
            &parse(
                r#"{"type":"response.failed","response":{"id":"r","status":"failed","error":{"code":"server_error","message":"The model crashed"}}}"#,
            ),
            &mut state,
        );
        assert_matches!(
            &out[0],
            Err(ProviderError::Api { message, code: Some(code), .. })
                if message == "The model crashed" && code == "server_error"
        );
    }

    #[test]
    fn error_event_is_error() {
        let mut state = create_stream_state();
        let out = process_stream_event(
            &parse(r#"{"type":"error","code":"invalid_prompt","message":"bad input"}"#),
            &mut state,
        );
        assert_matches!(&out[0], Err(ProviderError::Api { message, .. }) if message == "bad input");
    }

    #[test]
    fn unknown_events_are_ignored() {
        let mut state = create_stream_state();
        let out = process_stream_event(
            &parse(r#"{"type":"response.reasoning_summary_text.delta","delta":"hmm"}"#),
            &mut state,
        );
        assert!(out.is_empty());
    }
}
