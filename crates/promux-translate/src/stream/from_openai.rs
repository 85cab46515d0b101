use promux_protocol::openai::ChatCompletionChunk;
use serde_json::Value as JsonValue;

use crate::state::StreamState;
use crate::stream::emit;
use crate::usage::UsageTally;

/// OpenAI providers that honour `stream_options.include_usage` send the
/// usage chunk *after* the finish chunk, so the finish emission toward the
/// client is deferred to the flush call; everything else streams through.
pub fn translate(chunk: Option<&JsonValue>, state: &mut StreamState) -> Vec<JsonValue> {
    let mut out = Vec::new();
    let Some(chunk) = chunk else {
        emit::finish_for_target(state, &mut out);
        return out;
    };
    let Ok(parsed) = serde_json::from_value::<ChatCompletionChunk>(chunk.clone()) else {
        return out;
    };

    if !parsed.id.is_empty() {
        state.id = parsed.id;
    }
    if let Some(model) = parsed.model.filter(|m| !m.is_empty()) {
        state.model = model;
    }
    if let Some(usage) = parsed.usage {
        state.merge_usage(UsageTally {
            input_tokens: Some(usage.prompt_tokens),
            output_tokens: Some(usage.completion_tokens),
        });
    }

    for choice in parsed.choices {
        if choice.delta.role.is_some() {
            emit::start_for_target(state, &mut out);
        }
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            state.content.push_str(&text);
            emit::text_for_target(state, &mut out, &text);
        }
        if let Some(text) = choice.delta.reasoning_content.filter(|t| !t.is_empty()) {
            state.thinking.push_str(&text);
            emit::thinking_for_target(state, &mut out, &text);
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let key = tc.index.unwrap_or(0);
            let mut announce = false;
            {
                let call = state.tool_call_mut(key);
                if let Some(id) = tc.id.filter(|i| !i.is_empty()) {
                    call.id = id;
                }
                if let Some(name) = tc.function.name.filter(|n| !n.is_empty()) {
                    if call.name.is_empty() {
                        announce = true;
                    }
                    call.name = name;
                }
            }
            if announce {
                emit::tool_start_for_target(state, &mut out, key);
            }
            if let Some(args) = tc.function.arguments.filter(|a| !a.is_empty()) {
                state.tool_call_mut(key).arguments.push_str(&args);
                emit::tool_args_for_target(state, &mut out, key, &args);
            }
        }
        if let Some(reason) = choice.finish_reason {
            state.finish_reason = Some(reason);
        }
    }
    out
}
