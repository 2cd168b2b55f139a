//! API error body parsing.
//!
//! Handles the envelope shapes the Responses API and compatible servers use:
//! - Standard: `{"error": {"message": "...", "type": "...", "code": "..."}}`
//! - Detail:   `{"detail": "..."}`
//! - Flat:     `{"message": "...", "code": "..."}`

use serde_json::Value;

/// Parsed API error information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiErrorInfo {
    /// Human-readable error message.
    pub message: String,
    /// Service error code or type.
    pub code: Option<String>,
    /// Whether the request can be retried (429 or 5xx).
    pub retryable: bool,
}

/// Parse an error response body, falling back to the raw text.
pub fn parse_api_error(body: &str, status: u16) -> ApiErrorInfo {
    let retryable = status == 429 || status >= 500;
    let fallback = || ApiErrorInfo {
        message: format!("HTTP {status}: {body}"),
        code: None,
        retryable,
    };

    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return fallback();
    };

    if let Some(msg) = json["error"]["message"].as_str() {
        let code = json["error"]["code"]
            .as_str()
            .or_else(|| json["error"]["type"].as_str())
            .map(String::from);
        return ApiErrorInfo {
            message: msg.to_string(),
            code,
            retryable,
        };
    }

    if let Some(msg) = json["detail"].as_str().or_else(|| json["message"].as_str()) {
        return ApiErrorInfo {
            message: msg.to_string(),
            code: json["code"].as_str().map(String::from),
            retryable,
        };
    }

    fallback()
}
