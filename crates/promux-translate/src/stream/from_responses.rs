use promux_protocol::responses::{self, ResponsesEvent};
use serde_json::Value as JsonValue;

use crate::state::StreamState;
use crate::stream::emit;
use crate::usage::UsageTally;

pub fn translate(chunk: Option<&JsonValue>, state: &mut StreamState) -> Vec<JsonValue> {
    let mut out = Vec::new();
    let Some(chunk) = chunk else {
        emit::finish_for_target(state, &mut out);
        return out;
    };
    let Ok(event) = serde_json::from_value::<ResponsesEvent>(chunk.clone()) else {
        return out;
    };

    match event.kind.as_str() {
        responses::EVENT_CREATED | responses::EVENT_IN_PROGRESS => {
            if let Some(response) = event.response {
                if !response.id.is_empty() {
                    state.id = response.id;
                }
                if !response.model.is_empty() {
                    state.model = response.model;
                }
            }
            emit::start_for_target(state, &mut out);
        }
        responses::EVENT_OUTPUT_ITEM_ADDED => {
            let Some(item) = event.item else {
                return out;
            };
            if item["type"] == "function_call" {
                let key = event.output_index.unwrap_or(state.tool_calls.len() as u32);
                {
                    let call = state.tool_call_mut(key);
                    if let Some(id) = item
                        .get("call_id")
                        .or_else(|| item.get("id"))
                        .and_then(JsonValue::as_str)
                    {
                        call.id = id.to_string();
                    }
                    if let Some(name) = item.get("name").and_then(JsonValue::as_str) {
                        call.name = name.to_string();
                    }
                }
                emit::tool_start_for_target(state, &mut out, key);
            }
        }
        responses::EVENT_TEXT_DELTA => {
            if let Some(text) = event.delta.as_deref().filter(|t| !t.is_empty()) {
                state.content.push_str(text);
                emit::text_for_target(state, &mut out, text);
            }
        }
        responses::EVENT_REASONING_DELTA | "response.reasoning_text.delta" => {
            if let Some(text) = event.delta.as_deref().filter(|t| !t.is_empty()) {
                state.thinking.push_str(text);
                emit::thinking_for_target(state, &mut out, text);
            }
        }
        responses::EVENT_FN_ARGS_DELTA => {
            if let Some(args) = event.delta.as_deref().filter(|a| !a.is_empty()) {
                let key = event
                    .output_index
                    .or_else(|| state.tool_calls.keys().next_back().copied())
                    .unwrap_or(0);
                state.tool_call_mut(key).arguments.push_str(args);
                emit::tool_args_for_target(state, &mut out, key, args);
            }
        }
        responses::EVENT_OUTPUT_ITEM_DONE => {
            // Authoritative complete arguments for the call, if present.
            if let Some(item) = event.item {
                if item["type"] == "function_call" {
                    if let (Some(key), Some(args)) = (
                        event.output_index,
                        item.get("arguments").and_then(JsonValue::as_str),
                    ) {
                        state.tool_call_mut(key).arguments = args.to_string();
                    }
                }
            }
        }
        responses::EVENT_COMPLETED | responses::EVENT_FAILED | "response.incomplete" => {
            if let Some(response) = event.response {
                if let Some(usage) = response.usage {
                    state.merge_usage(UsageTally {
                        input_tokens: Some(usage.input_tokens),
                        output_tokens: Some(usage.output_tokens),
                    });
                }
            }
            state.finish_reason = Some(match event.kind.as_str() {
                responses::EVENT_COMPLETED => {
                    if state.has_tool_calls() {
                        "tool_calls".to_string()
                    } else {
                        "stop".to_string()
                    }
                }
                _ => "length".to_string(),
            });
            emit::finish_for_target(state, &mut out);
        }
        _ => {}
    }
    out
}
