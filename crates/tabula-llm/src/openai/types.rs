//! Wire types for the `OpenAI` Responses API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{InputItem, ToolSchema, TurnRequest};

/// One input item of a Responses request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesInputItem {
    /// A chat message.
    Message {
        /// `user` or `developer`.
        role: String,
        /// Plain text content.
        content: String,
    },
    /// Result of a function call.
    FunctionCallOutput {
        /// Call being answered.
        call_id: String,
        /// JSON-encoded result.
        output: String,
    },
}

impl From<&InputItem> for ResponsesInputItem {
    fn from(item: &InputItem) -> Self {
        match item {
            InputItem::UserMessage { text } => Self::Message {
                role: "user".into(),
                content: text.clone(),
            },
            InputItem::FunctionCallOutput { call_id, output } => Self::FunctionCallOutput {
                call_id: call_id.to_string(),
                output: output.clone(),
            },
        }
    }
}

/// Function tool definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponsesTool {
    /// Always `function`.
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name.
    pub name: String,
    /// Function description.
    pub description: String,
    /// JSON Schema for the arguments.
    pub parameters: Value,
}

impl From<&ToolSchema> for ResponsesTool {
    fn from(tool: &ToolSchema) -> Self {
        Self {
            tool_type: "function".into(),
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        }
    }
}

/// Request body for `POST /responses`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponsesRequest {
    /// Model id.
    pub model: String,
    /// System instructions.
    pub instructions: String,
    /// Input items.
    pub input: Vec<ResponsesInputItem>,
    /// Always `true`.
    pub stream: bool,
    /// Sampling temperature.
    pub temperature: f64,
    /// Response being continued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    /// Tool definitions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ResponsesTool>,
    /// Whether several calls may be emitted in one turn.
    pub parallel_tool_calls: bool,
}

impl From<&TurnRequest> for ResponsesRequest {
    fn from(request: &TurnRequest) -> Self {
        Self {
            model: request.model.clone(),
            instructions: request.instructions.clone(),
            input: request.input.iter().map(ResponsesInputItem::from).collect(),
            stream: true,
            temperature: request.temperature,
            previous_response_id: request.previous_response_id.as_ref().map(ToString::to_string),
            tools: request.tools.iter().map(ResponsesTool::from).collect(),
            parallel_tool_calls: request.parallel_tool_calls,
        }
    }
}

/// Output item carried by `response.output_item.*` events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsesOutputItem {
    /// `message`, `function_call`, `reasoning`, ...
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Call id, for function calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name, for function calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// JSON-encoded arguments, for function calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Error details inside a failed response or an `error` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsesError {
    /// Error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message.
    #[serde(default)]
    pub message: String,
}

/// Response object carried by lifecycle events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsesResponse {
    /// Response id.
    #[serde(default)]
    pub id: String,
    /// `in_progress`, `completed`, `failed`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Set when the response failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponsesError>,
}

/// One SSE event of a streamed response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsesSseEvent {
    /// Event type, e.g. `response.output_text.delta`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Text delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    /// Output item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ResponsesOutputItem>,
    /// Response object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponsesResponse>,
    /// Error code, for `error` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message, for `error` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
