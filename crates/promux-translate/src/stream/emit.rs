//! Client-chunk builders, one family per target dialect. These own the
//! framing bookkeeping (role chunk, block open/close, lifecycle events) so
//! the per-source translators stay declarative.

use promux_protocol::{openai, WireFormat};
use serde_json::{json, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::state::{OpenBlock, StreamState};
use crate::usage::{denormalize_claude_stop, denormalize_gemini_finish, usage_json};

// ---- OpenAI chat completions ----

fn openai_chunk(state: &StreamState, delta: JsonValue, finish: Option<&str>) -> JsonValue {
    json!({
        "id": state.id,
        "object": openai::CHUNK_OBJECT,
        "created": state.created,
        "model": state.model,
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish}],
    })
}

pub fn openai_ensure_role(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    if state.role_sent {
        return;
    }
    state.role_sent = true;
    out.push(openai_chunk(state, json!({"role": "assistant"}), None));
}

pub fn openai_text(state: &mut StreamState, out: &mut Vec<JsonValue>, text: &str) {
    openai_ensure_role(state, out);
    out.push(openai_chunk(state, json!({"content": text}), None));
}

pub fn openai_thinking(state: &mut StreamState, out: &mut Vec<JsonValue>, text: &str) {
    openai_ensure_role(state, out);
    out.push(openai_chunk(state, json!({"reasoning_content": text}), None));
}

pub fn openai_tool_start(state: &mut StreamState, out: &mut Vec<JsonValue>, key: u32) {
    openai_ensure_role(state, out);
    let Some(call) = state.tool_calls.get(&key) else {
        return;
    };
    let delta = json!({"tool_calls": [{
        "index": call.ordinal,
        "id": call.id,
        "type": "function",
        "function": {"name": call.name, "arguments": ""},
    }]});
    out.push(openai_chunk(state, delta, None));
}

pub fn openai_tool_args(state: &mut StreamState, out: &mut Vec<JsonValue>, key: u32, args: &str) {
    let Some(call) = state.tool_calls.get(&key) else {
        return;
    };
    let delta = json!({"tool_calls": [{
        "index": call.ordinal,
        "function": {"arguments": args},
    }]});
    out.push(openai_chunk(state, delta, None));
}

pub fn openai_finish(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    if state.finish_sent {
        return;
    }
    state.finish_sent = true;
    openai_ensure_role(state, out);
    let reason = state.finish_reason.clone().unwrap_or_else(|| "stop".to_string());
    let mut chunk = openai_chunk(state, json!({}), Some(&reason));
    if let Some(usage) = &state.usage {
        chunk["usage"] = usage_json(WireFormat::OpenAI, usage);
    }
    out.push(chunk);
}

// ---- Claude messages ----

pub fn claude_ensure_start(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    if state.message_started {
        return;
    }
    state.message_started = true;
    out.push(json!({
        "type": "message_start",
        "message": {
            "id": state.id,
            "type": "message",
            "role": "assistant",
            "model": state.model,
            "content": [],
            "stop_reason": null,
            "stop_sequence": null,
            "usage": {"input_tokens": state.usage.and_then(|u| u.input_tokens).unwrap_or(0), "output_tokens": 0},
        },
    }));
}

fn claude_open_index(state: &StreamState) -> u32 {
    state.next_block_index.saturating_sub(1)
}

pub fn claude_close(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    if state.open_block.take().is_some() {
        out.push(json!({"type": "content_block_stop", "index": claude_open_index(state)}));
    }
}

fn claude_open(state: &mut StreamState, out: &mut Vec<JsonValue>, block: OpenBlock) {
    claude_ensure_start(state, out);
    if state.open_block == Some(block) {
        return;
    }
    claude_close(state, out);
    let index = state.next_block_index;
    state.next_block_index += 1;
    state.open_block = Some(block);
    let content_block = match block {
        OpenBlock::Text => json!({"type": "text", "text": ""}),
        OpenBlock::Thinking => json!({"type": "thinking", "thinking": ""}),
        OpenBlock::Tool(key) => {
            let call = state.tool_calls.get(&key);
            json!({
                "type": "tool_use",
                "id": call.map(|c| c.id.as_str()).unwrap_or_default(),
                "name": call.map(|c| c.name.as_str()).unwrap_or_default(),
                "input": {},
            })
        }
    };
    out.push(json!({
        "type": "content_block_start",
        "index": index,
        "content_block": content_block,
    }));
}

pub fn claude_text(state: &mut StreamState, out: &mut Vec<JsonValue>, text: &str) {
    claude_open(state, out, OpenBlock::Text);
    out.push(json!({
        "type": "content_block_delta",
        "index": claude_open_index(state),
        "delta": {"type": "text_delta", "text": text},
    }));
}

pub fn claude_thinking(state: &mut StreamState, out: &mut Vec<JsonValue>, text: &str) {
    claude_open(state, out, OpenBlock::Thinking);
    out.push(json!({
        "type": "content_block_delta",
        "index": claude_open_index(state),
        "delta": {"type": "thinking_delta", "thinking": text},
    }));
}

pub fn claude_tool_start(state: &mut StreamState, out: &mut Vec<JsonValue>, key: u32) {
    claude_open(state, out, OpenBlock::Tool(key));
}

pub fn claude_tool_args(state: &mut StreamState, out: &mut Vec<JsonValue>, key: u32, args: &str) {
    claude_open(state, out, OpenBlock::Tool(key));
    out.push(json!({
        "type": "content_block_delta",
        "index": claude_open_index(state),
        "delta": {"type": "input_json_delta", "partial_json": args},
    }));
}

pub fn claude_finish(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    if state.finish_sent {
        return;
    }
    state.finish_sent = true;
    claude_ensure_start(state, out);
    claude_close(state, out);
    let reason = state
        .finish_reason
        .as_deref()
        .map(denormalize_claude_stop)
        .unwrap_or_else(|| "end_turn".to_string());
    let usage = state.usage.unwrap_or_default();
    out.push(json!({
        "type": "message_delta",
        "delta": {"stop_reason": reason, "stop_sequence": null},
        "usage": usage_json(WireFormat::Claude, &usage),
    }));
    out.push(json!({"type": "message_stop"}));
}

// ---- Gemini ----

pub fn gemini_parts(state: &StreamState, parts: JsonValue, finish: Option<&str>) -> JsonValue {
    let mut candidate = json!({
        "content": {"parts": parts, "role": "model"},
        "index": 0,
    });
    if let Some(reason) = finish {
        candidate["finishReason"] = JsonValue::String(denormalize_gemini_finish(reason));
    }
    json!({"candidates": [candidate], "modelVersion": state.model})
}

pub fn gemini_text(state: &mut StreamState, out: &mut Vec<JsonValue>, text: &str, thought: bool) {
    let part = if thought {
        json!({"text": text, "thought": true})
    } else {
        json!({"text": text})
    };
    out.push(gemini_parts(state, json!([part]), None));
}

/// Gemini carries complete function calls only; buffered calls are flushed
/// as whole parts right before the finish chunk.
pub fn gemini_tools(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    let mut parts = Vec::new();
    for call in state.tool_calls.values_mut() {
        if call.announced {
            continue;
        }
        call.announced = true;
        let args: JsonValue = serde_json::from_str(&call.arguments).unwrap_or(json!({}));
        parts.push(json!({"functionCall": {"name": call.name, "args": args}}));
    }
    if !parts.is_empty() {
        out.push(gemini_parts(state, JsonValue::Array(parts), None));
    }
}

pub fn gemini_finish(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    if state.finish_sent {
        return;
    }
    state.finish_sent = true;
    gemini_tools(state, out);
    let reason = state.finish_reason.clone().unwrap_or_else(|| "stop".to_string());
    let mut chunk = gemini_parts(state, json!([]), Some(&reason));
    if let Some(usage) = &state.usage {
        chunk["usageMetadata"] = usage_json(WireFormat::Gemini, usage);
    }
    out.push(chunk);
}

// ---- OpenAI responses ----

pub fn responses_ensure_created(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    if state.response_started {
        return;
    }
    state.response_started = true;
    out.push(json!({
        "type": "response.created",
        "response": {
            "id": state.id,
            "object": "response",
            "created_at": state.created,
            "status": "in_progress",
            "model": state.model,
            "output": [],
        },
    }));
}

fn responses_message_item_id(state: &StreamState) -> String {
    format!("msg_{}", state.id)
}

pub fn responses_text(state: &mut StreamState, out: &mut Vec<JsonValue>, text: &str) {
    responses_ensure_created(state, out);
    if !state.role_sent {
        state.role_sent = true;
        out.push(json!({
            "type": "response.output_item.added",
            "output_index": 0,
            "item": {
                "type": "message",
                "id": responses_message_item_id(state),
                "role": "assistant",
                "status": "in_progress",
                "content": [],
            },
        }));
    }
    out.push(json!({
        "type": "response.output_text.delta",
        "item_id": responses_message_item_id(state),
        "output_index": 0,
        "content_index": 0,
        "delta": text,
    }));
}

pub fn responses_thinking(state: &mut StreamState, out: &mut Vec<JsonValue>, text: &str) {
    responses_ensure_created(state, out);
    out.push(json!({
        "type": "response.reasoning_summary_text.delta",
        "item_id": responses_message_item_id(state),
        "output_index": 0,
        "delta": text,
    }));
}

pub fn responses_tool_start(state: &mut StreamState, out: &mut Vec<JsonValue>, key: u32) {
    responses_ensure_created(state, out);
    let Some(call) = state.tool_calls.get_mut(&key) else {
        return;
    };
    if call.announced {
        return;
    }
    call.announced = true;
    let (ordinal, id, name) = (call.ordinal, call.id.clone(), call.name.clone());
    out.push(json!({
        "type": "response.output_item.added",
        "output_index": ordinal + 1,
        "item": {
            "type": "function_call",
            "id": format!("fc_{id}"),
            "call_id": id,
            "name": name,
            "arguments": "",
            "status": "in_progress",
        },
    }));
}

pub fn responses_tool_args(state: &mut StreamState, out: &mut Vec<JsonValue>, key: u32, args: &str) {
    responses_tool_start(state, out, key);
    let Some(call) = state.tool_calls.get(&key) else {
        return;
    };
    out.push(json!({
        "type": "response.function_call_arguments.delta",
        "item_id": format!("fc_{}", call.id),
        "output_index": call.ordinal + 1,
        "delta": args,
    }));
}

pub fn responses_finish(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    if state.finish_sent {
        return;
    }
    state.finish_sent = true;
    responses_ensure_created(state, out);
    let mut output = Vec::new();
    if !state.content.is_empty() || state.tool_calls.is_empty() {
        output.push(json!({
            "type": "message",
            "id": responses_message_item_id(state),
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
    let mut response = json!({
        "id": state.id,
        "object": "response",
        "created_at": state.created,
        "status": "completed",
        "model": state.model,
        "output": output,
    });
    if let Some(usage) = &state.usage {
        response["usage"] = usage_json(WireFormat::OpenAIResponses, usage);
    }
    out.push(json!({"type": "response.completed", "response": response}));
}

// ---- Ollama ----

fn ollama_created_at(state: &StreamState) -> String {
    OffsetDateTime::from_unix_timestamp(state.created)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default()
}

pub fn ollama_delta(
    state: &mut StreamState,
    out: &mut Vec<JsonValue>,
    content: &str,
    thinking: Option<&str>,
) {
    let mut message = json!({"role": "assistant", "content": content});
    if let Some(text) = thinking {
        message["thinking"] = JsonValue::String(text.to_string());
    }
    out.push(json!({
        "model": state.model,
        "created_at": ollama_created_at(state),
        "message": message,
        "done": false,
    }));
}

pub fn ollama_finish(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    if state.finish_sent {
        return;
    }
    state.finish_sent = true;
    let usage = state.usage.unwrap_or_default();
    out.push(json!({
        "model": state.model,
        "created_at": ollama_created_at(state),
        "message": {"role": "assistant", "content": ""},
        "done": true,
        "done_reason": state.finish_reason.clone().unwrap_or_else(|| "stop".to_string()),
        "prompt_eval_count": usage.input_tokens.unwrap_or(0),
        "eval_count": usage.output_tokens.unwrap_or(0),
    }));
}

// ---- Target dispatch ----
//
// Source translators call these; the target dialect lives in the state.

pub fn start_for_target(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    match state.target {
        WireFormat::OpenAI => openai_ensure_role(state, out),
        WireFormat::Claude => claude_ensure_start(state, out),
        WireFormat::OpenAIResponses => responses_ensure_created(state, out),
        _ => {}
    }
}

pub fn text_for_target(state: &mut StreamState, out: &mut Vec<JsonValue>, text: &str) {
    match state.target {
        WireFormat::OpenAI => openai_text(state, out, text),
        WireFormat::Claude => claude_text(state, out, text),
        WireFormat::Gemini => gemini_text(state, out, text, false),
        WireFormat::OpenAIResponses => responses_text(state, out, text),
        WireFormat::Ollama => ollama_delta(state, out, text, None),
        WireFormat::Kiro | WireFormat::Antigravity => {}
    }
}

pub fn thinking_for_target(state: &mut StreamState, out: &mut Vec<JsonValue>, text: &str) {
    match state.target {
        WireFormat::OpenAI => openai_thinking(state, out, text),
        WireFormat::Claude => claude_thinking(state, out, text),
        WireFormat::Gemini => gemini_text(state, out, text, true),
        WireFormat::OpenAIResponses => responses_thinking(state, out, text),
        WireFormat::Ollama => ollama_delta(state, out, "", Some(text)),
        WireFormat::Kiro | WireFormat::Antigravity => {}
    }
}

pub fn tool_start_for_target(state: &mut StreamState, out: &mut Vec<JsonValue>, key: u32) {
    match state.target {
        WireFormat::OpenAI => openai_tool_start(state, out, key),
        WireFormat::Claude => claude_tool_start(state, out, key),
        WireFormat::OpenAIResponses => responses_tool_start(state, out, key),
        // Gemini and Ollama carry complete calls only; flushed at finish.
        _ => {}
    }
}

pub fn tool_args_for_target(state: &mut StreamState, out: &mut Vec<JsonValue>, key: u32, args: &str) {
    match state.target {
        WireFormat::OpenAI => openai_tool_args(state, out, key, args),
        WireFormat::Claude => claude_tool_args(state, out, key, args),
        WireFormat::OpenAIResponses => responses_tool_args(state, out, key, args),
        _ => {}
    }
}

/// Finish dispatch used by every source translator's flush path.
pub fn finish_for_target(state: &mut StreamState, out: &mut Vec<JsonValue>) {
    match state.target {
        WireFormat::OpenAI => openai_finish(state, out),
        WireFormat::Claude => claude_finish(state, out),
        WireFormat::Gemini => gemini_finish(state, out),
        WireFormat::OpenAIResponses => responses_finish(state, out),
        WireFormat::Ollama => ollama_finish(state, out),
        WireFormat::Kiro | WireFormat::Antigravity => {}
    }
}
