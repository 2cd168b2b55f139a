//! # Provider Trait
//!
//! Core abstraction for the LLM backend. A provider turns one [`TurnRequest`]
//! into a stream of [`ProtocolEvent`]s: the response is created, text deltas
//! arrive, completed function calls arrive, and the response completes.
//!
//! Agents only ever see this shape, so the `OpenAI` provider and the scripted
//! test provider are interchangeable.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabula_core::{CallId, ResponseId};

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Boxed stream of [`ProtocolEvent`]s returned by [`Provider::create_turn`].
pub type ProtocolEventStream =
    Pin<Box<dyn Stream<Item = Result<ProtocolEvent, ProviderError>> + Send>>;

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SSE stream parsing failed.
    #[error("SSE parse error: {message}")]
    SseParse {
        /// Error description.
        message: String,
    },

    /// Missing or rejected credentials.
    #[error("Auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Rate limited by the service.
    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested retry delay in milliseconds.
        retry_after_ms: u64,
        /// Error description.
        message: String,
    },

    /// The service returned an error status or a failed response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code (0 for in-stream failures).
        status: u16,
        /// Error description.
        message: String,
        /// Service-specific error code.
        code: Option<String>,
        /// Whether this error can be retried.
        retryable: bool,
    },

    /// Stream was cancelled.
    #[error("Stream cancelled")]
    Cancelled,

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl ProviderError {
    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                    })
            }
            Self::RateLimited { .. } => true,
            Self::Api { retryable, .. } => *retryable,
            Self::SseParse { .. }
            | Self::Auth { .. }
            | Self::Cancelled
            | Self::Json(_)
            | Self::Other { .. } => false,
        }
    }

    /// Retry-after delay in milliseconds, if the service sent one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Error category string for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(_) => "network",
            Self::Json(_) | Self::SseParse { .. } => "parse",
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::Api { .. } => "api",
            Self::Cancelled => "cancelled",
            Self::Other { .. } => "unknown",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// One item of turn input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    /// A user message.
    UserMessage {
        /// Message text.
        text: String,
    },
    /// The result of a function call from an earlier turn.
    FunctionCallOutput {
        /// Call being answered.
        call_id: CallId,
        /// JSON-encoded result.
        output: String,
    },
}

impl InputItem {
    /// Shorthand for a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserMessage { text: text.into() }
    }

    /// Shorthand for a function result.
    pub fn function_output(call_id: CallId, output: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            call_id,
            output: output.into(),
        }
    }
}

/// A function the model may call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Function name.
    pub name: String,
    /// What the function does, for the model.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// Everything needed to request one model turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Model id.
    pub model: String,
    /// System instructions.
    pub instructions: String,
    /// New input for this turn.
    pub input: Vec<InputItem>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Response this turn continues, if any.
    pub previous_response_id: Option<ResponseId>,
    /// Functions the model may call.
    pub tools: Vec<ToolSchema>,
    /// Whether the model may emit several calls in one turn.
    pub parallel_tool_calls: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Normalized event from one model turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// The service created the response.
    ResponseCreated {
        /// Response id.
        response_id: ResponseId,
    },
    /// A piece of assistant text.
    TextDelta {
        /// Text fragment.
        delta: String,
    },
    /// A complete function call.
    FunctionCallDone {
        /// Call id.
        call_id: CallId,
        /// Function name.
        name: String,
        /// JSON-encoded arguments.
        arguments: String,
    },
    /// The response finished.
    ResponseCompleted {
        /// Response id.
        response_id: ResponseId,
    },
}

/// Core LLM provider trait.
///
/// Implementors must be `Send + Sync` for use across async tasks. Errors
/// raised before any event is available are returned directly; later ones
/// arrive as stream items.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier for logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Stream one model turn.
    async fn create_turn(&self, request: &TurnRequest) -> ProviderResult<ProtocolEventStream>;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn create_turn(&self, request: &TurnRequest) -> ProviderResult<ProtocolEventStream> {
        (**self).create_turn(request).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable() {
        let err = ProviderError::RateLimited {
            retry_after_ms: 5000,
            message: "Too many requests".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_ms(), Some(5000));
        assert_eq!(err.category(), "rate_limit");
    }

    #[test]
    fn api_error_retryability_follows_flag() {
        let err = ProviderError::Api {
            status: 400,
            message: "bad".into(),
            code: None,
            retryable: false,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "API error (400): bad");
    }

    #[test]
    fn auth_is_not_retryable() {
        let err = ProviderError::Auth {
            message: "missing key".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "auth");
    }

    #[test]
    fn input_items_serialize_tagged() {
        let item = InputItem::function_output(CallId::from("c1"), r#"{"Result":"ok"}"#);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "function_call_output");
        assert_eq!(json["call_id"], "c1");
    }
}
