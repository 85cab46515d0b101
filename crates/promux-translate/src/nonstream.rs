//! Rendering a finished [`StreamState`] as a complete (non-streaming)
//! response document. Non-stream requests run the provider body through the
//! same stream translator as a single synthetic chunk; this aggregates what
//! accumulated.

use promux_protocol::{openai, WireFormat};
use serde_json::{json, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::state::StreamState;
use crate::usage::{
    denormalize_claude_stop, denormalize_gemini_finish, normalize_claude_stop,
    normalize_gemini_finish, usage_json, UsageTally,
};

/// Absorb a complete provider response document into the state, so the same
/// aggregation path serves stream and non-stream requests. Non-stream bodies
/// differ structurally from stream chunks (`message` vs `delta`), hence this
/// dedicated reader rather than the chunk translators.
pub fn absorb_response(format: WireFormat, value: &JsonValue, state: &mut StreamState) {
    match format {
        WireFormat::OpenAI => absorb_openai(value, state),
        WireFormat::Claude | WireFormat::Kiro => absorb_claude(value, state),
        WireFormat::Gemini | WireFormat::Antigravity => absorb_gemini(value, state),
        WireFormat::OpenAIResponses => absorb_responses(value, state),
        WireFormat::Ollama => absorb_ollama(value, state),
    }
}

fn absorb_openai(value: &JsonValue, state: &mut StreamState) {
    if let Some(id) = value.get("id").and_then(JsonValue::as_str).filter(|s| !s.is_empty()) {
        state.id = id.to_string();
    }
    if let Some(model) = value.get("model").and_then(JsonValue::as_str).filter(|s| !s.is_empty()) {
        state.model = model.to_string();
    }
    if let Some(choice) = value["choices"].get(0) {
        let message = &choice["message"];
        match &message["content"] {
            JsonValue::String(text) => state.content.push_str(text),
            JsonValue::Array(parts) => {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(JsonValue::as_str) {
                        state.content.push_str(text);
                    }
                }
            }
            _ => {}
        }
        if let Some(text) = message.get("reasoning_content").and_then(JsonValue::as_str) {
            state.thinking.push_str(text);
        }
        for (i, tc) in message["tool_calls"]
            .as_array()
            .map(|a| a.as_slice())
            .unwrap_or_default()
            .iter()
            .enumerate()
        {
            let call = state.tool_call_mut(i as u32);
            call.id = tc
                .get("id")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", i + 1));
            call.name = tc["function"]["name"].as_str().unwrap_or_default().to_string();
            call.arguments = tc["function"]["arguments"].as_str().unwrap_or("{}").to_string();
        }
        if let Some(reason) = choice.get("finish_reason").and_then(JsonValue::as_str) {
            state.finish_reason = Some(reason.to_string());
        }
    }
    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        state.merge_usage(UsageTally {
            input_tokens: usage["prompt_tokens"].as_u64().map(|v| v as u32),
            output_tokens: usage["completion_tokens"].as_u64().map(|v| v as u32),
        });
    }
}

fn absorb_claude(value: &JsonValue, state: &mut StreamState) {
    if let Some(id) = value.get("id").and_then(JsonValue::as_str).filter(|s| !s.is_empty()) {
        state.id = id.to_string();
    }
    if let Some(model) = value.get("model").and_then(JsonValue::as_str).filter(|s| !s.is_empty()) {
        state.model = model.to_string();
    }
    for block in value["content"].as_array().map(|a| a.as_slice()).unwrap_or_default() {
        match block.get("type").and_then(JsonValue::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(JsonValue::as_str) {
                    state.content.push_str(text);
                }
            }
            Some("thinking") => {
                if let Some(text) = block.get("thinking").and_then(JsonValue::as_str) {
                    state.thinking.push_str(text);
                }
            }
            Some("tool_use") => {
                let key = state.tool_calls.len() as u32;
                let call = state.tool_call_mut(key);
                call.id = block.get("id").and_then(JsonValue::as_str).unwrap_or_default().to_string();
                call.name = block.get("name").and_then(JsonValue::as_str).unwrap_or_default().to_string();
                call.arguments =
                    serde_json::to_string(block.get("input").unwrap_or(&json!({}))).unwrap_or_default();
            }
            _ => {}
        }
    }
    if let Some(reason) = value.get("stop_reason").and_then(JsonValue::as_str) {
        state.finish_reason = Some(normalize_claude_stop(reason));
    }
    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        state.merge_usage(UsageTally {
            input_tokens: usage["input_tokens"].as_u64().map(|v| v as u32),
            output_tokens: usage["output_tokens"].as_u64().map(|v| v as u32),
        });
    }
}

fn absorb_gemini(value: &JsonValue, state: &mut StreamState) {
    for candidate in value["candidates"].as_array().map(|a| a.as_slice()).unwrap_or_default() {
        for part in candidate["content"]["parts"]
            .as_array()
            .map(|a| a.as_slice())
            .unwrap_or_default()
        {
            if let Some(text) = part.get("text").and_then(JsonValue::as_str) {
                if part.get("thought").and_then(JsonValue::as_bool) == Some(true) {
                    state.thinking.push_str(text);
                } else {
                    state.content.push_str(text);
                }
            }
            if let Some(fc) = part.get("functionCall") {
                let key = state.tool_calls.len() as u32;
                let id = fc
                    .get("id")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}", key + 1));
                let call = state.tool_call_mut(key);
                call.id = id;
                call.name = fc.get("name").and_then(JsonValue::as_str).unwrap_or_default().to_string();
                call.arguments =
                    serde_json::to_string(fc.get("args").unwrap_or(&json!({}))).unwrap_or_default();
            }
        }
        if let Some(reason) = candidate.get("finishReason").and_then(JsonValue::as_str) {
            state.finish_reason = Some(normalize_gemini_finish(reason));
        }
    }
    if let Some(usage) = value.get("usageMetadata").filter(|u| u.is_object()) {
        state.merge_usage(UsageTally {
            input_tokens: usage["promptTokenCount"].as_u64().map(|v| v as u32),
            output_tokens: usage["candidatesTokenCount"].as_u64().map(|v| v as u32),
        });
    }
}

fn absorb_responses(value: &JsonValue, state: &mut StreamState) {
    if let Some(id) = value.get("id").and_then(JsonValue::as_str).filter(|s| !s.is_empty()) {
        state.id = id.to_string();
    }
    if let Some(model) = value.get("model").and_then(JsonValue::as_str).filter(|s| !s.is_empty()) {
        state.model = model.to_string();
    }
    for item in value["output"].as_array().map(|a| a.as_slice()).unwrap_or_default() {
        match item.get("type").and_then(JsonValue::as_str) {
            Some("message") => {
                for part in item["content"].as_array().map(|a| a.as_slice()).unwrap_or_default() {
                    if let Some(text) = part.get("text").and_then(JsonValue::as_str) {
                        state.content.push_str(text);
                    }
                }
            }
            Some("function_call") => {
                let key = state.tool_calls.len() as u32;
                let call = state.tool_call_mut(key);
                call.id = item
                    .get("call_id")
                    .or_else(|| item.get("id"))
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                call.name = item.get("name").and_then(JsonValue::as_str).unwrap_or_default().to_string();
                call.arguments = item
                    .get("arguments")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("{}")
                    .to_string();
            }
            _ => {}
        }
    }
    if state.content.is_empty() {
        if let Some(text) = value.get("output_text").and_then(JsonValue::as_str) {
            state.content.push_str(text);
        }
    }
    state.finish_reason = Some(match value.get("status").and_then(JsonValue::as_str) {
        Some("incomplete") => "length".to_string(),
        _ if state.has_tool_calls() => "tool_calls".to_string(),
        _ => "stop".to_string(),
    });
    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        state.merge_usage(UsageTally {
            input_tokens: usage["input_tokens"].as_u64().map(|v| v as u32),
            output_tokens: usage["output_tokens"].as_u64().map(|v| v as u32),
        });
    }
}

fn absorb_ollama(value: &JsonValue, state: &mut StreamState) {
    if let Some(text) = value["message"]["content"].as_str() {
        state.content.push_str(text);
    }
    if let Some(text) = value["message"]["thinking"].as_str() {
        state.thinking.push_str(text);
    }
    if let Some(reason) = value.get("done_reason").and_then(JsonValue::as_str) {
        state.finish_reason = Some(reason.to_string());
    }
    let tally = UsageTally {
        input_tokens: value["prompt_eval_count"].as_u64().map(|v| v as u32),
        output_tokens: value["eval_count"].as_u64().map(|v| v as u32),
    };
    if tally.input_tokens.is_some() || tally.output_tokens.is_some() {
        state.merge_usage(tally);
    }
}

pub fn aggregate_response(state: &StreamState) -> JsonValue {
    match state.target {
        WireFormat::OpenAI => openai_response(state),
        WireFormat::Claude => claude_response(state),
        WireFormat::Gemini => gemini_response(state),
        WireFormat::OpenAIResponses => responses_response(state),
        WireFormat::Ollama => ollama_response(state),
        WireFormat::Kiro | WireFormat::Antigravity => JsonValue::Null,
    }
}

fn finish_reason(state: &StreamState) -> String {
    state
        .finish_reason
        .clone()
        .unwrap_or_else(|| if state.has_tool_calls() { "tool_calls" } else { "stop" }.to_string())
}

fn openai_response(state: &StreamState) -> JsonValue {
    let mut message = json!({"role": "assistant", "content": state.content});
    if !state.thinking.is_empty() {
        message["reasoning_content"] = JsonValue::String(state.thinking.clone());
    }
    if state.has_tool_calls() {
        message["tool_calls"] = JsonValue::Array(
            state
                .tool_calls
                .values()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments},
                    })
                })
                .collect(),
        );
    }
    let mut out = json!({
        "id": state.id,
        "object": openai::COMPLETION_OBJECT,
        "created": state.created,
        "model": state.model,
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason(state)}],
    });
    if let Some(usage) = &state.usage {
        out["usage"] = usage_json(WireFormat::OpenAI, usage);
    }
    out
}

fn claude_response(state: &StreamState) -> JsonValue {
    let mut content = Vec::new();
    if !state.thinking.is_empty() {
        content.push(json!({"type": "thinking", "thinking": state.thinking}));
    }
    if !state.content.is_empty() {
        content.push(json!({"type": "text", "text": state.content}));
    }
    for call in state.tool_calls.values() {
        content.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": serde_json::from_str::<JsonValue>(&call.arguments).unwrap_or(json!({})),
        }));
    }
    let usage = state.usage.unwrap_or_default();
    json!({
        "id": state.id,
        "type": "message",
        "role": "assistant",
        "model": state.model,
        "content": content,
        "stop_reason": denormalize_claude_stop(&finish_reason(state)),
        "stop_sequence": null,
        "usage": usage_json(WireFormat::Claude, &usage),
    })
}

fn gemini_response(state: &StreamState) -> JsonValue {
    let mut parts = Vec::new();
    if !state.thinking.is_empty() {
        parts.push(json!({"text": state.thinking, "thought": true}));
    }
    if !state.content.is_empty() {
        parts.push(json!({"text": state.content}));
    }
    for call in state.tool_calls.values() {
        parts.push(json!({"functionCall": {
            "name": call.name,
            "args": serde_json::from_str::<JsonValue>(&call.arguments).unwrap_or(json!({})),
        }}));
    }
    let mut out = json!({
        "candidates": [{
            "content": {"parts": parts, "role": "model"},
            "finishReason": denormalize_gemini_finish(&finish_reason(state)),
            "index": 0,
        }],
        "modelVersion": state.model,
    });
    if let Some(usage) = &state.usage {
        out["usageMetadata"] = usage_json(WireFormat::Gemini, usage);
    }
    out
}

fn responses_response(state: &StreamState) -> JsonValue {
    let mut output = Vec::new();
    if !state.content.is_empty() || state.tool_calls.is_empty() {
        output.push(json!({
            "type": "message",
            "id": format!("msg_{}", state.id),
            "role": "assistant",
            "status": "completed",
            "content": [{"type": "output_text", "text": state.content, "annotations": []}],
        }));
    }
    for call in state.tool_calls.values() {
        output.push(json!({
            "type": "function_call",
            "id": format!("fc_{}", call.id),
            "call_id": call.id,
            "name": call.name,
            "arguments": call.arguments,
            "status": "completed",
        }));
    }
    let mut out = json!({
        "id": state.id,
        "object": "response",
        "created_at": state.created,
        "status": "completed",
        "model": state.model,
        "output": output,
        "output_text": state.content,
    });
    if let Some(usage) = &state.usage {
        out["usage"] = usage_json(WireFormat::OpenAIResponses, usage);
    }
    out
}

fn ollama_response(state: &StreamState) -> JsonValue {
    let created_at = OffsetDateTime::from_unix_timestamp(state.created)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default();
    let usage = state.usage.unwrap_or_default();
    let mut message = json!({"role": "assistant", "content": state.content});
    if !state.thinking.is_empty() {
        message["thinking"] = JsonValue::String(state.thinking.clone());
    }
    json!({
        "model": state.model,
        "created_at": created_at,
        "message": message,
        "done": true,
        "done_reason": finish_reason(state),
        "prompt_eval_count": usage.input_tokens.unwrap_or(0),
        "eval_count": usage.output_tokens.unwrap_or(0),
    })
}
