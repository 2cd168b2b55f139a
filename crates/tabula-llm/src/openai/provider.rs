//! `OpenAI` provider implementing the [`Provider`] trait.
//!
//! Sends streaming requests to the Responses API with a bearer API key and
//! converts the SSE stream into [`ProtocolEvent`]s.
//!
//! [`ProtocolEvent`]: crate::provider::ProtocolEvent

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use tabula_settings::OpenAiSettings;
use tracing::{debug, info, instrument, warn};

use crate::error_parsing::parse_api_error;
use crate::provider::{ProtocolEventStream, Provider, ProviderError, ProviderResult, TurnRequest};
use crate::retry::parse_retry_after_header;
use crate::sse::{SseParserOptions, parse_sse_lines};
use crate::window::ensure_response_window;

use super::stream_handler::{create_stream_state, process_stream_event};
use super::types::{ResponsesRequest, ResponsesSseEvent};

/// The Responses API ends with an explicit `[DONE]`, so a trailing partial
/// line is dropped.
static SSE_OPTIONS: SseParserOptions = SseParserOptions {
    process_remaining_buffer: false,
};

/// Connection settings for [`OpenAiProvider`].
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Whole-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl OpenAiConfig {
    /// Build a config from settings, reading the key from the configured env var.
    pub fn from_settings(settings: &OpenAiSettings) -> ProviderResult<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::Auth {
                message: format!("environment variable {} is not set", settings.api_key_env),
            })?;
        Ok(Self {
            base_url: settings.base_url.clone(),
            api_key,
            request_timeout_ms: settings.request_timeout_ms,
        })
    }
}

/// Streaming client for `POST {base_url}/responses`.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider with its own HTTP client.
    pub fn new(config: OpenAiConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        info!(base_url = %config.base_url, "OpenAI provider initialized");
        Ok(Self { config, client })
    }

    fn url(&self) -> String {
        format!("{}/responses", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip_all, fields(model = %request.model, input_items = request.input.len()))]
    async fn create_turn(&self, request: &TurnRequest) -> ProviderResult<ProtocolEventStream> {
        let body = ResponsesRequest::from(request);
        debug!(
            previous_response_id = ?body.previous_response_id,
            tool_count = body.tools.len(),
            "starting OpenAI turn"
        );

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after_header);
            let body_text = response.text().await.unwrap_or_default();
            let info = parse_api_error(&body_text, status.as_u16());
            warn!(status = status.as_u16(), message = %info.message, "OpenAI request failed");
            if let (429, Some(retry_after_ms)) = (status.as_u16(), retry_after) {
                return Err(ProviderError::RateLimited {
                    retry_after_ms,
                    message: info.message,
                });
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: info.message,
                code: info.code,
                retryable: info.retryable,
            });
        }

        let sse_lines = parse_sse_lines(response.bytes_stream(), &SSE_OPTIONS);

        let event_stream = sse_lines
            .scan(create_stream_state(), |state, line| {
                let events = match line {
                    Err(e) => vec![Err(e)],
                    Ok(line) => match serde_json::from_str::<ResponsesSseEvent>(&line) {
                        Ok(event) => process_stream_event(&event, state),
                        Err(e) => {
                            warn!(line = %line, error = %e, "Failed to parse OpenAI SSE event");
                            Vec::new()
                        }
                    },
                };
                std::future::ready(Some(events))
            })
            .flat_map(stream::iter);

        Ok(ensure_response_window(Box::pin(event_stream)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{InputItem, ProtocolEvent, ToolSchema};
    use assert_matches::assert_matches;
    use tabula_core::ResponseId;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(OpenAiConfig {
            base_url: format!("{}/v1", server.uri()),
            api_key: "sk-test".into(),
            request_timeout_ms: 5_000,
        })
        .unwrap()
    }

    fn request(previous: Option<&str>) -> TurnRequest {
        TurnRequest {
            model: "gpt-4o".into(),
            instructions: "You are a table assistant.".into(),
            input: vec![InputItem::user("plot sales")],
            temperature: 0.1,
            previous_response_id: previous.map(ResponseId::from),
            tools: vec![ToolSchema {
                name: "generate_plot".into(),
                description: "Delegate plotting".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }],
            parallel_tool_calls: false,
        }
    }

    fn sse(events: &[&str]) -> String {
        let mut body = String::new();
        for e in events {
            body.push_str("event: x\ndata: ");
            body.push_str(e);
            body.push_str("\n\n");
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn collect(stream: ProtocolEventStream) -> Vec<ProtocolEvent> {
        stream.map(Result::unwrap).collect().await
    }

    #[tokio::test]
    async fn streams_text_and_function_calls() {
        let server = MockServer::start().await;
        let body = sse(&[
            r#"{"type":"response.created","response":{"id":"resp_1"}}"#,
            r#"{"type":"response.output_text.delta","delta":"Plotting."}"#,
            r#"{"type":"response.output_item.done","item":{"type":"function_call","call_id":"call_1","name":"generate_plot","arguments":"{\"table_name\":\"sales\",\"user_request\":\"bar chart\"}"}}"#,
            r#"{"type":"response.completed","response":{"id":"resp_1"}}"#,
        ]);
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "stream": true,
                "parallel_tool_calls": false,
                "previous_response_id": "resp_0"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let stream = provider(&server).create_turn(&request(Some("resp_0"))).await.unwrap();
        let events = collect(stream).await;
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            ProtocolEvent::ResponseCreated {
                response_id: "resp_1".into()
            }
        );
        assert_matches!(&events[2], ProtocolEvent::FunctionCallDone { name, .. } if name == "generate_plot");
        assert_eq!(
            events[3],
            ProtocolEvent::ResponseCompleted {
                response_id: "resp_1".into()
            }
        );
    }

    #[tokio::test]
    async fn truncated_stream_still_completes() {
        let server = MockServer::start().await;
        let body = "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_2\"}}\n\n\
                    data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hi\"}\n\n";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let events = collect(provider(&server).create_turn(&request(None)).await.unwrap()).await;
        assert_eq!(
            events.last(),
            Some(&ProtocolEvent::ResponseCompleted {
                response_id: "resp_2".into()
            })
        );
    }

    #[tokio::test]
    async fn server_error_is_retryable_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": {"message": "Overloaded", "type": "server_error"}
            })))
            .mount(&server)
            .await;

        let Err(err) = provider(&server).create_turn(&request(None)).await else {
            panic!("expected an error");
        };
        assert_matches!(err, ProviderError::Api { status: 503, ref message, .. } if message == "Overloaded");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_honours_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "2")
                    .set_body_json(serde_json::json!({"error": {"message": "Slow down"}})),
            )
            .mount(&server)
            .await;

        let Err(err) = provider(&server).create_turn(&request(None)).await else {
            panic!("expected an error");
        };
        assert_eq!(err.retry_after_ms(), Some(2000));
    }

    #[tokio::test]
    async fn bad_request_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("nope"))
            .mount(&server)
            .await;

        let Err(err) = provider(&server).create_turn(&request(None)).await else {
            panic!("expected an error");
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "API error (400): HTTP 400: nope");
    }

    #[test]
    fn missing_api_key_is_auth_error() {
        let settings = OpenAiSettings {
            api_key_env: "TABULA_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..OpenAiSettings::default()
        };
        assert_matches!(
            OpenAiConfig::from_settings(&settings),
            Err(ProviderError::Auth { .. })
        );
    }
}
