use promux_protocol::gemini::GenerateContentResponse;
use serde_json::Value as JsonValue;

use crate::state::StreamState;
use crate::stream::emit;
use crate::usage::{normalize_gemini_finish, UsageTally};

pub fn translate(chunk: Option<&JsonValue>, state: &mut StreamState) -> Vec<JsonValue> {
    let mut out = Vec::new();
    let Some(chunk) = chunk else {
        emit::finish_for_target(state, &mut out);
        return out;
    };
    let Ok(parsed) = serde_json::from_value::<GenerateContentResponse>(chunk.clone()) else {
        return out;
    };

    if let Some(id) = parsed.response_id.filter(|i| !i.is_empty()) {
        state.id = id;
    }
    if let Some(usage) = parsed.usage_metadata {
        let tally = UsageTally {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        };
        if tally.input_tokens.is_some() || tally.output_tokens.is_some() {
            state.merge_usage(tally);
        }
    }

    let mut finish: Option<String> = None;
    for candidate in parsed.candidates {
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
                    if part.is_thought() {
                        state.thinking.push_str(text);
                        emit::thinking_for_target(state, &mut out, text);
                    } else {
                        state.content.push_str(text);
                        emit::text_for_target(state, &mut out, text);
                    }
                }
                if let Some(fc) = part.function_call {
                    // Gemini delivers complete calls; key by order of arrival.
                    let key = state.tool_calls.len() as u32;
                    let args = serde_json::to_string(&fc.args).unwrap_or_else(|_| "{}".to_string());
                    {
                        let call = state.tool_call_mut(key);
                        call.id = fc
                            .id
                            .filter(|i| !i.is_empty())
                            .unwrap_or_else(|| format!("call_{}", key + 1));
                        call.name = fc.name;
                        call.arguments = args.clone();
                    }
                    emit::tool_start_for_target(state, &mut out, key);
                    emit::tool_args_for_target(state, &mut out, key, &args);
                }
            }
        }
        if let Some(reason) = candidate.finish_reason {
            finish = Some(normalize_gemini_finish(&reason));
        }
    }

    if let Some(reason) = finish {
        state.finish_reason = Some(if state.has_tool_calls() && reason == "stop" {
            "tool_calls".to_string()
        } else {
            reason
        });
        emit::finish_for_target(state, &mut out);
    }
    out
}
