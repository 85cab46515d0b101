//! Gemini generateContent client payloads mapped to the provider dialects.

use promux_protocol::claude;
use promux_protocol::gemini::{Content, GenerateContentRequest, Part};
use promux_protocol::openai;
use promux_protocol::WireFormat;
use serde_json::{json, Value as JsonValue};

use crate::error::TranslateError;
use crate::registry::RequestCtx;
use crate::request::kiro_build::{self, KiroConversation, KiroRole, KiroTurn};
use crate::request::{antigravity_envelope, DEFAULT_MAX_TOKENS};

fn parse(ctx: &RequestCtx<'_>) -> Result<GenerateContentRequest, TranslateError> {
    serde_json::from_value(ctx.body.clone())
        .map_err(|err| TranslateError::invalid(WireFormat::Gemini, err))
}

fn system_text(request: &GenerateContentRequest) -> Option<String> {
    let content = request.system_instruction.as_ref()?;
    let text = joined_text(content);
    (!text.is_empty()).then_some(text)
}

fn joined_text(content: &Content) -> String {
    let mut out = String::new();
    for part in &content.parts {
        if let Some(text) = &part.text {
            out.push_str(text);
        }
    }
    out
}

fn function_declarations(request: &GenerateContentRequest) -> Vec<JsonValue> {
    let mut decls = Vec::new();
    if let Some(tools) = request.tools.as_ref().and_then(JsonValue::as_array) {
        for tool in tools {
            if let Some(inner) = tool.get("functionDeclarations").and_then(JsonValue::as_array) {
                decls.extend(inner.iter().cloned());
            }
        }
    }
    decls
}

pub fn to_openai(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut messages: Vec<openai::ChatMessage> = Vec::new();
    if let Some(system) = system_text(&request) {
        messages.push(openai::ChatMessage::text("system", system));
    }

    for content in &request.contents {
        let is_model = content.role.as_deref() == Some("model");
        let mut text = String::new();
        let mut tool_calls: Vec<openai::ToolCall> = Vec::new();
        let mut parts_out: Vec<openai::ContentPart> = Vec::new();
        for part in &content.parts {
            if let Some(t) = &part.text {
                if !part.is_thought() {
                    text.push_str(t);
                    parts_out.push(openai::ContentPart::Text { text: t.clone() });
                }
            }
            if let Some(data) = &part.inline_data {
                parts_out.push(openai::ContentPart::ImageUrl {
                    image_url: openai::ImageUrl {
                        url: format!("data:{};base64,{}", data.mime_type, data.data),
                        detail: None,
                    },
                });
            }
            if let Some(fc) = &part.function_call {
                tool_calls.push(openai::ToolCall {
                    index: Some(tool_calls.len() as u32),
                    id: fc
                        .id
                        .clone()
                        .or_else(|| Some(format!("call_{}", tool_calls.len() + 1))),
                    kind: Some("function".to_string()),
                    function: openai::ToolCallFunction {
                        name: Some(fc.name.clone()),
                        arguments: Some(
                            serde_json::to_string(&fc.args).unwrap_or_else(|_| "{}".to_string()),
                        ),
                    },
                });
            }
            if let Some(fr) = &part.function_response {
                messages.push(openai::ChatMessage {
                    role: "tool".to_string(),
                    content: Some(openai::MessageContent::Text(
                        serde_json::to_string(&fr.response).unwrap_or_default(),
                    )),
                    tool_call_id: fr.id.clone().or_else(|| Some(fr.name.clone())),
                    ..Default::default()
                });
            }
        }

        if is_model {
            if !text.is_empty() || !tool_calls.is_empty() {
                messages.push(openai::ChatMessage {
                    role: "assistant".to_string(),
                    content: (!text.is_empty()).then_some(openai::MessageContent::Text(text)),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    ..Default::default()
                });
            }
        } else if !parts_out.is_empty() {
            let has_image = parts_out
                .iter()
                .any(|p| matches!(p, openai::ContentPart::ImageUrl { .. }));
            messages.push(openai::ChatMessage {
                role: "user".to_string(),
                content: Some(if has_image {
                    openai::MessageContent::Parts(parts_out)
                } else {
                    openai::MessageContent::Text(text)
                }),
                ..Default::default()
            });
        }
    }

    let config = request.generation_config.clone().unwrap_or_default();
    let mut out = json!({
        "model": ctx.model,
        "messages": serde_json::to_value(&messages)
            .map_err(|err| TranslateError::invalid(WireFormat::OpenAI, err))?,
        "stream": ctx.stream,
    });
    if ctx.stream {
        out["stream_options"] = json!({"include_usage": true});
    }
    if let Some(t) = config.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(p) = config.top_p {
        out["top_p"] = json!(p);
    }
    if let Some(max) = config.max_output_tokens {
        out["max_tokens"] = json!(max);
    }
    if let Some(stop) = &config.stop_sequences {
        out["stop"] = json!(stop);
    }
    let decls = function_declarations(&request);
    if !decls.is_empty() {
        out["tools"] = JsonValue::Array(
            decls
                .iter()
                .map(|d| {
                    json!({"type": "function", "function": {
                        "name": d.get("name"),
                        "description": d.get("description"),
                        "parameters": d.get("parameters"),
                    }})
                })
                .collect(),
        );
    }
    Ok(out)
}

pub fn to_claude(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut messages: Vec<claude::MessageParam> = Vec::new();
    for content in &request.contents {
        let role = if content.role.as_deref() == Some("model") {
            "assistant"
        } else {
            "user"
        };
        let mut blocks: Vec<claude::ContentBlock> = Vec::new();
        for part in &content.parts {
            if let Some(text) = &part.text {
                if !part.is_thought() && !text.is_empty() {
                    blocks.push(claude::ContentBlock::Text {
                        text: text.clone(),
                        extra: Default::default(),
                    });
                }
            }
            if let Some(data) = &part.inline_data {
                blocks.push(claude::ContentBlock::Image {
                    source: claude::ImageSource::Base64 {
                        media_type: data.mime_type.clone(),
                        data: data.data.clone(),
                    },
                });
            }
            if let Some(fc) = &part.function_call {
                blocks.push(claude::ContentBlock::ToolUse {
                    id: fc
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("call_{}", blocks.len() + 1)),
                    name: fc.name.clone(),
                    input: fc.args.clone(),
                });
            }
            if let Some(fr) = &part.function_response {
                blocks.push(claude::ContentBlock::ToolResult {
                    tool_use_id: fr.id.clone().unwrap_or_else(|| fr.name.clone()),
                    content: Some(JsonValue::String(
                        serde_json::to_string(&fr.response).unwrap_or_default(),
                    )),
                    is_error: None,
                });
            }
        }
        if !blocks.is_empty() {
            messages.push(claude::MessageParam {
                role: role.to_string(),
                content: claude::MessageContent::Blocks(blocks),
            });
        }
    }

    let config = request.generation_config.clone().unwrap_or_default();
    let decls = function_declarations(&request);
    let request_out = claude::MessagesRequest {
        model: ctx.model.to_string(),
        max_tokens: Some(config.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        messages,
        system: system_text(&request).map(claude::SystemParam::Text),
        temperature: config.temperature,
        top_p: config.top_p,
        stop_sequences: config.stop_sequences.clone(),
        stream: ctx.stream.then_some(true),
        tools: (!decls.is_empty()).then(|| {
            decls
                .iter()
                .map(|d| claude::Tool {
                    name: d
                        .get("name")
                        .and_then(JsonValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    description: d
                        .get("description")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                    input_schema: d.get("parameters").cloned(),
                })
                .collect()
        }),
        tool_choice: None,
        thinking: None,
        extra: Default::default(),
    };
    serde_json::to_value(request_out).map_err(|err| TranslateError::invalid(WireFormat::Claude, err))
}

pub fn to_responses(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut input = Vec::new();
    for content in &request.contents {
        let is_model = content.role.as_deref() == Some("model");
        for part in &content.parts {
            if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
                if part.is_thought() {
                    continue;
                }
                let (role, part_type) = if is_model {
                    ("assistant", "output_text")
                } else {
                    ("user", "input_text")
                };
                input.push(json!({
                    "type": "message",
                    "role": role,
                    "content": [{"type": part_type, "text": text}],
                }));
            }
            if let Some(fc) = &part.function_call {
                input.push(json!({
                    "type": "function_call",
                    "call_id": fc.id.clone().unwrap_or_else(|| format!("call_{}", input.len() + 1)),
                    "name": fc.name,
                    "arguments": serde_json::to_string(&fc.args).unwrap_or_default(),
                }));
            }
            if let Some(fr) = &part.function_response {
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": fr.id.clone().unwrap_or_else(|| fr.name.clone()),
                    "output": serde_json::to_string(&fr.response).unwrap_or_default(),
                }));
            }
        }
    }

    let config = request.generation_config.clone().unwrap_or_default();
    let mut out = json!({
        "model": ctx.model,
        "input": input,
        "stream": ctx.stream,
    });
    if let Some(instructions) = system_text(&request) {
        out["instructions"] = JsonValue::String(instructions);
    }
    if let Some(max) = config.max_output_tokens {
        out["max_output_tokens"] = json!(max);
    }
    if let Some(t) = config.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(p) = config.top_p {
        out["top_p"] = json!(p);
    }
    Ok(out)
}

pub fn to_kiro(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut turns = Vec::new();
    for content in &request.contents {
        let role = if content.role.as_deref() == Some("model") {
            KiroRole::Assistant
        } else {
            KiroRole::User
        };
        let text = joined_text(content);
        turns.push(KiroTurn { role, text });
    }
    let decls = function_declarations(&request);
    let tools = (!decls.is_empty()).then(|| {
        decls
            .iter()
            .map(|d| {
                kiro_build::tool_spec(
                    d.get("name").and_then(JsonValue::as_str).unwrap_or_default(),
                    d.get("description").and_then(JsonValue::as_str),
                    d.get("parameters"),
                )
            })
            .collect()
    });
    Ok(kiro_build::build(
        KiroConversation {
            model: ctx.model.to_string(),
            system: system_text(&request),
            turns,
            tools,
            tool_results: None,
        },
        ctx.creds,
    ))
}

/// Gemini -> Antigravity is the envelope around the original body, minus the
/// fields Antigravity rejects.
pub fn to_antigravity(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let body = serde_json::to_value(&request)
        .map_err(|err| TranslateError::invalid(WireFormat::Antigravity, err))?;
    Ok(antigravity_envelope(ctx.model, body))
}
