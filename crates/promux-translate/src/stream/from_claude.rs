use promux_protocol::claude::{BlockDelta, ContentBlock, StreamEvent};
use serde_json::{json, Value as JsonValue};

use crate::state::StreamState;
use crate::stream::emit;
use crate::usage::{normalize_claude_stop, UsageTally};

pub fn translate(chunk: Option<&JsonValue>, state: &mut StreamState) -> Vec<JsonValue> {
    let mut out = Vec::new();
    let Some(chunk) = chunk else {
        emit::finish_for_target(state, &mut out);
        return out;
    };
    let Ok(event) = serde_json::from_value::<StreamEvent>(chunk.clone()) else {
        return out;
    };

    match event {
        StreamEvent::MessageStart { message } => {
            if !message.id.is_empty() {
                state.id = message.id;
            }
            if !message.model.is_empty() {
                state.model = message.model;
            }
            if let Some(usage) = message.usage {
                state.merge_usage(UsageTally {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                });
            }
            emit::start_for_target(state, &mut out);
        }
        StreamEvent::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            ContentBlock::ToolUse { id, name, .. } => {
                let call = state.tool_call_mut(index);
                call.id = id;
                call.name = name;
                emit::tool_start_for_target(state, &mut out, index);
            }
            ContentBlock::Text { text, .. } if !text.is_empty() => {
                state.content.push_str(&text);
                emit::text_for_target(state, &mut out, &text);
            }
            _ => {}
        },
        StreamEvent::ContentBlockDelta { index, delta } => match delta {
            BlockDelta::TextDelta { text } => {
                state.content.push_str(&text);
                emit::text_for_target(state, &mut out, &text);
            }
            BlockDelta::ThinkingDelta { thinking } => {
                state.thinking.push_str(&thinking);
                emit::thinking_for_target(state, &mut out, &thinking);
            }
            BlockDelta::InputJsonDelta { partial_json } => {
                state.tool_call_mut(index).arguments.push_str(&partial_json);
                emit::tool_args_for_target(state, &mut out, index, &partial_json);
            }
            BlockDelta::SignatureDelta { .. } => {}
        },
        StreamEvent::ContentBlockStop { .. } => {}
        StreamEvent::MessageDelta { delta, usage } => {
            if let Some(usage) = usage {
                state.merge_usage(UsageTally {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                });
            }
            if let Some(reason) = delta.stop_reason {
                state.finish_reason = Some(normalize_claude_stop(&reason));
                emit::finish_for_target(state, &mut out);
            }
        }
        StreamEvent::MessageStop => {
            emit::finish_for_target(state, &mut out);
        }
        StreamEvent::Ping => {}
        StreamEvent::Error { error } => {
            out.push(json!({"error": error}));
        }
    }
    out
}
