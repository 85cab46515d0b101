//! OpenAI Responses client payloads mapped to the provider dialects.
//!
//! The `input` field is polymorphic (a bare string, message items, tool
//! items); normalisation into turns happens here once and each target maps
//! the turns directly.

use promux_protocol::responses::ResponsesRequest;
use promux_protocol::WireFormat;
use serde_json::{json, Value as JsonValue};

use crate::error::TranslateError;
use crate::registry::RequestCtx;
use crate::request::kiro_build::{self, KiroConversation, KiroRole, KiroTurn};
use crate::request::{antigravity_envelope, decode_args, DEFAULT_MAX_TOKENS};

fn parse(ctx: &RequestCtx<'_>) -> Result<ResponsesRequest, TranslateError> {
    serde_json::from_value(ctx.body.clone())
        .map_err(|err| TranslateError::invalid(WireFormat::OpenAIResponses, err))
}

#[derive(Debug, Clone)]
enum InputItem {
    Message { role: String, text: String },
    FunctionCall { call_id: String, name: String, arguments: String },
    FunctionOutput { call_id: String, output: String },
}

fn input_items(request: &ResponsesRequest) -> Vec<InputItem> {
    let mut items = Vec::new();
    match &request.input {
        None => {}
        Some(JsonValue::String(text)) => items.push(InputItem::Message {
            role: "user".to_string(),
            text: text.clone(),
        }),
        Some(JsonValue::Array(raw_items)) => {
            for raw in raw_items {
                let kind = raw.get("type").and_then(JsonValue::as_str);
                match kind {
                    Some("function_call") => items.push(InputItem::FunctionCall {
                        call_id: str_field(raw, "call_id")
                            .or_else(|| str_field(raw, "id"))
                            .unwrap_or_default(),
                        name: str_field(raw, "name").unwrap_or_default(),
                        arguments: str_field(raw, "arguments").unwrap_or_default(),
                    }),
                    Some("function_call_output") => items.push(InputItem::FunctionOutput {
                        call_id: str_field(raw, "call_id").unwrap_or_default(),
                        output: str_field(raw, "output").unwrap_or_default(),
                    }),
                    Some("message") | None => {
                        let role = str_field(raw, "role").unwrap_or_else(|| "user".to_string());
                        let text = item_text(raw);
                        if !text.is_empty() {
                            items.push(InputItem::Message { role, text });
                        }
                    }
                    _ => {}
                }
            }
        }
        Some(_) => {}
    }
    items
}

fn str_field(value: &JsonValue, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(str::to_string)
}

fn item_text(item: &JsonValue) -> String {
    match item.get("content") {
        Some(JsonValue::String(text)) => text.clone(),
        Some(JsonValue::Array(parts)) => {
            let mut out = String::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(JsonValue::as_str) {
                    out.push_str(text);
                }
            }
            out
        }
        _ => String::new(),
    }
}

fn instructions(request: &ResponsesRequest, items: &[InputItem]) -> Option<String> {
    let mut texts: Vec<String> = Vec::new();
    if let Some(instructions) = request.instructions.as_deref().filter(|s| !s.is_empty()) {
        texts.push(instructions.to_string());
    }
    for item in items {
        if let InputItem::Message { role, text } = item {
            if role == "system" || role == "developer" {
                texts.push(text.clone());
            }
        }
    }
    (!texts.is_empty()).then(|| texts.join("\n"))
}

fn function_tools(request: &ResponsesRequest) -> Vec<JsonValue> {
    request
        .tools
        .as_ref()
        .and_then(JsonValue::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter(|t| t.get("type").and_then(JsonValue::as_str) == Some("function"))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

pub fn to_openai(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let items = input_items(&request);
    let mut messages = Vec::new();
    if let Some(system) = instructions(&request, &items) {
        messages.push(json!({"role": "system", "content": system}));
    }
    for item in &items {
        match item {
            InputItem::Message { role, text } => {
                if role == "system" || role == "developer" {
                    continue;
                }
                messages.push(json!({"role": role, "content": text}));
            }
            InputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => messages.push(json!({
                "role": "assistant",
                "tool_calls": [{
                    "index": 0,
                    "id": call_id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments},
                }],
            })),
            InputItem::FunctionOutput { call_id, output } => messages.push(json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": output,
            })),
        }
    }

    let mut out = json!({
        "model": ctx.model,
        "messages": messages,
        "stream": ctx.stream,
    });
    if ctx.stream {
        out["stream_options"] = json!({"include_usage": true});
    }
    if let Some(max) = request.max_output_tokens {
        out["max_tokens"] = json!(max);
    }
    if let Some(t) = request.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(p) = request.top_p {
        out["top_p"] = json!(p);
    }
    let tools = function_tools(&request);
    if !tools.is_empty() {
        out["tools"] = JsonValue::Array(
            tools
                .iter()
                .map(|t| {
                    json!({"type": "function", "function": {
                        "name": t.get("name"),
                        "description": t.get("description"),
                        "parameters": t.get("parameters"),
                    }})
                })
                .collect(),
        );
    }
    Ok(out)
}

pub fn to_claude(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let items = input_items(&request);
    let mut messages: Vec<JsonValue> = Vec::new();
    for item in &items {
        match item {
            InputItem::Message { role, text } => {
                if role == "system" || role == "developer" {
                    continue;
                }
                let role = if role == "assistant" { "assistant" } else { "user" };
                messages.push(json!({"role": role, "content": text}));
            }
            InputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => messages.push(json!({
                "role": "assistant",
                "content": [{"type": "tool_use", "id": call_id, "name": name, "input": decode_args(arguments)}],
            })),
            InputItem::FunctionOutput { call_id, output } => messages.push(json!({
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": call_id, "content": output}],
            })),
        }
    }

    let mut out = json!({
        "model": ctx.model,
        "max_tokens": request.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
        "stream": ctx.stream,
    });
    if let Some(system) = instructions(&request, &items) {
        out["system"] = JsonValue::String(system);
    }
    if let Some(t) = request.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(p) = request.top_p {
        out["top_p"] = json!(p);
    }
    let tools = function_tools(&request);
    if !tools.is_empty() {
        out["tools"] = JsonValue::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.get("name"),
                        "description": t.get("description"),
                        "input_schema": t.get("parameters"),
                    })
                })
                .collect(),
        );
    }
    Ok(out)
}

pub fn to_gemini(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    gemini_value(ctx)
}

pub fn to_antigravity(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    gemini_value(ctx).map(|body| antigravity_envelope(ctx.model, body))
}

fn gemini_value(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let items = input_items(&request);
    let mut contents: Vec<JsonValue> = Vec::new();
    for item in &items {
        match item {
            InputItem::Message { role, text } => {
                if role == "system" || role == "developer" {
                    continue;
                }
                let role = if role == "assistant" { "model" } else { "user" };
                contents.push(json!({"role": role, "parts": [{"text": text}]}));
            }
            InputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => contents.push(json!({
                "role": "model",
                "parts": [{"functionCall": {"name": name, "args": decode_args(arguments), "id": call_id}}],
            })),
            InputItem::FunctionOutput { call_id, output } => contents.push(json!({
                "role": "user",
                "parts": [{"functionResponse": {"name": call_id, "response": {"result": output}, "id": call_id}}],
            })),
        }
    }

    let mut body = json!({"contents": contents});
    if let Some(system) = instructions(&request, &items) {
        body["systemInstruction"] = json!({"parts": [{"text": system}]});
    }
    let mut config = serde_json::Map::new();
    if let Some(t) = request.temperature {
        config.insert("temperature".to_string(), json!(t));
    }
    if let Some(p) = request.top_p {
        config.insert("topP".to_string(), json!(p));
    }
    if let Some(max) = request.max_output_tokens {
        config.insert("maxOutputTokens".to_string(), json!(max));
    }
    if !config.is_empty() {
        body["generationConfig"] = JsonValue::Object(config);
    }
    let tools = function_tools(&request);
    if !tools.is_empty() {
        body["tools"] = json!([{ "functionDeclarations": tools.iter().map(|t| json!({
            "name": t.get("name"),
            "description": t.get("description"),
            "parameters": t.get("parameters"),
        })).collect::<Vec<_>>() }]);
    }
    Ok(body)
}

pub fn to_kiro(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let items = input_items(&request);
    let mut turns = Vec::new();
    let mut tool_results = Vec::new();
    for item in &items {
        match item {
            InputItem::Message { role, text } => {
                if role == "system" || role == "developer" {
                    continue;
                }
                let role = if role == "assistant" {
                    KiroRole::Assistant
                } else {
                    KiroRole::User
                };
                turns.push(KiroTurn {
                    role,
                    text: text.clone(),
                });
            }
            InputItem::FunctionCall { .. } => {}
            InputItem::FunctionOutput { call_id, output } => {
                tool_results.push(kiro_build::tool_result(call_id, output.clone(), false));
            }
        }
    }
    let tools_raw = function_tools(&request);
    let tools = (!tools_raw.is_empty()).then(|| {
        tools_raw
            .iter()
            .map(|t| {
                kiro_build::tool_spec(
                    t.get("name").and_then(JsonValue::as_str).unwrap_or_default(),
                    t.get("description").and_then(JsonValue::as_str),
                    t.get("parameters"),
                )
            })
            .collect()
    });
    Ok(kiro_build::build(
        KiroConversation {
            model: ctx.model.to_string(),
            system: instructions(&request, &items),
            turns,
            tools,
            tool_results: (!tool_results.is_empty()).then_some(tool_results),
        },
        ctx.creds,
    ))
}
