//! OpenAI Responses API wire types. Input items are left loosely typed:
//! the dialect accepts strings, message items and tool items in one array.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Completed-response document (also embedded in lifecycle stream events).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesResponse {
    pub id: String,
    #[serde(default = "response_object")]
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResponsesUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// One streaming event. The `type` discriminator stays a plain string: the
/// dialect grows event names faster than any enum could track, and unknown
/// lifecycle events must pass through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponsesResponse>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

pub const EVENT_CREATED: &str = "response.created";
pub const EVENT_IN_PROGRESS: &str = "response.in_progress";
pub const EVENT_OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
pub const EVENT_OUTPUT_ITEM_DONE: &str = "response.output_item.done";
pub const EVENT_TEXT_DELTA: &str = "response.output_text.delta";
pub const EVENT_TEXT_DONE: &str = "response.output_text.done";
pub const EVENT_REASONING_DELTA: &str = "response.reasoning_summary_text.delta";
pub const EVENT_FN_ARGS_DELTA: &str = "response.function_call_arguments.delta";
pub const EVENT_COMPLETED: &str = "response.completed";
pub const EVENT_FAILED: &str = "response.failed";

fn response_object() -> String {
    "response".to_string()
}
