//! Anthropic Messages client payloads mapped to the provider dialects.

use promux_protocol::claude::{ContentBlock, ImageSource, MessagesRequest};
use promux_protocol::gemini;
use promux_protocol::openai;
use promux_protocol::WireFormat;
use serde_json::{json, Value as JsonValue};

use crate::error::TranslateError;
use crate::registry::RequestCtx;
use crate::request::kiro_build::{self, KiroConversation, KiroRole, KiroTurn};
use crate::request::{antigravity_envelope, tool_result_to_text};

fn parse(ctx: &RequestCtx<'_>) -> Result<MessagesRequest, TranslateError> {
    serde_json::from_value(ctx.body.clone())
        .map_err(|err| TranslateError::invalid(WireFormat::Claude, err))
}

pub fn to_openai(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut messages: Vec<openai::ChatMessage> = Vec::new();

    if let Some(system) = &request.system {
        let text = system.joined_text();
        if !text.is_empty() {
            messages.push(openai::ChatMessage::text("system", text));
        }
    }

    for message in &request.messages {
        let mut text = String::new();
        let mut parts: Vec<openai::ContentPart> = Vec::new();
        let mut tool_calls: Vec<openai::ToolCall> = Vec::new();
        for block in message.blocks() {
            match block {
                ContentBlock::Text { text: t, .. } => {
                    text.push_str(&t);
                    parts.push(openai::ContentPart::Text { text: t });
                }
                ContentBlock::Image { source } => {
                    let url = match source {
                        ImageSource::Base64 { media_type, data } => {
                            format!("data:{media_type};base64,{data}")
                        }
                        ImageSource::Url { url } => url,
                    };
                    parts.push(openai::ContentPart::ImageUrl {
                        image_url: openai::ImageUrl { url, detail: None },
                    });
                }
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(openai::ToolCall {
                        index: Some(tool_calls.len() as u32),
                        id: Some(id),
                        kind: Some("function".to_string()),
                        function: openai::ToolCallFunction {
                            name: Some(name),
                            arguments: Some(
                                serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                            ),
                        },
                    });
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    messages.push(openai::ChatMessage {
                        role: "tool".to_string(),
                        content: Some(openai::MessageContent::Text(tool_result_to_text(
                            &content.unwrap_or(JsonValue::Null),
                        ))),
                        tool_call_id: Some(tool_use_id),
                        ..Default::default()
                    });
                }
                // Thinking blocks do not survive into OpenAI request history.
                ContentBlock::Thinking { .. } | ContentBlock::Unknown => {}
            }
        }

        if message.role == "assistant" {
            if !text.is_empty() || !tool_calls.is_empty() {
                messages.push(openai::ChatMessage {
                    role: "assistant".to_string(),
                    content: (!text.is_empty()).then_some(openai::MessageContent::Text(text)),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    ..Default::default()
                });
            }
        } else if !parts.is_empty() {
            let has_image = parts
                .iter()
                .any(|p| matches!(p, openai::ContentPart::ImageUrl { .. }));
            let content = if has_image {
                openai::MessageContent::Parts(parts)
            } else {
                openai::MessageContent::Text(text)
            };
            messages.push(openai::ChatMessage {
                role: "user".to_string(),
                content: Some(content),
                ..Default::default()
            });
        }
    }

    let mut out = json!({
        "model": ctx.model,
        "messages": serde_json::to_value(&messages)
            .map_err(|err| TranslateError::invalid(WireFormat::OpenAI, err))?,
        "stream": ctx.stream,
    });
    if ctx.stream {
        out["stream_options"] = json!({"include_usage": true});
    }
    if let Some(max) = request.max_tokens {
        out["max_tokens"] = json!(max);
    }
    if let Some(t) = request.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(p) = request.top_p {
        out["top_p"] = json!(p);
    }
    if let Some(stop) = &request.stop_sequences {
        out["stop"] = json!(stop);
    }
    if let Some(tools) = &request.tools {
        out["tools"] = JsonValue::Array(
            tools
                .iter()
                .map(|t| {
                    json!({"type": "function", "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }})
                })
                .collect(),
        );
    }
    if let Some(choice) = &request.tool_choice {
        out["tool_choice"] = map_tool_choice_openai(choice);
    }
    Ok(out)
}

fn map_tool_choice_openai(choice: &JsonValue) -> JsonValue {
    match choice.get("type").and_then(JsonValue::as_str) {
        Some("any") => json!("required"),
        Some("none") => json!("none"),
        Some("tool") => match choice.get("name").and_then(JsonValue::as_str) {
            Some(name) => json!({"type": "function", "function": {"name": name}}),
            None => json!("auto"),
        },
        _ => json!("auto"),
    }
}

pub fn to_gemini(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    serde_json::to_value(gemini_body(&request))
        .map_err(|err| TranslateError::invalid(WireFormat::Gemini, err))
}

pub fn to_antigravity(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let body = serde_json::to_value(gemini_body(&request))
        .map_err(|err| TranslateError::invalid(WireFormat::Antigravity, err))?;
    Ok(antigravity_envelope(ctx.model, body))
}

fn gemini_body(request: &MessagesRequest) -> gemini::GenerateContentRequest {
    let mut contents: Vec<gemini::Content> = Vec::new();
    for message in &request.messages {
        let role = if message.role == "assistant" {
            "model"
        } else {
            "user"
        };
        let mut parts = Vec::new();
        for block in message.blocks() {
            match block {
                ContentBlock::Text { text, .. } => parts.push(gemini::Part::text(text)),
                ContentBlock::Image { source } => {
                    if let ImageSource::Base64 { media_type, data } = source {
                        parts.push(gemini::Part {
                            inline_data: Some(gemini::InlineData {
                                mime_type: media_type,
                                data,
                            }),
                            ..Default::default()
                        });
                    }
                }
                ContentBlock::ToolUse { id, name, input } => parts.push(gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        name,
                        args: input,
                        id: Some(id),
                    }),
                    ..Default::default()
                }),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => parts.push(gemini::Part {
                    function_response: Some(gemini::FunctionResponse {
                        name: tool_use_id.clone(),
                        response: json!({"result": tool_result_to_text(&content.unwrap_or(JsonValue::Null))}),
                        id: Some(tool_use_id),
                    }),
                    ..Default::default()
                }),
                ContentBlock::Thinking { .. } | ContentBlock::Unknown => {}
            }
        }
        if !parts.is_empty() {
            contents.push(gemini::Content {
                role: Some(role.to_string()),
                parts,
            });
        }
    }

    gemini::GenerateContentRequest {
        contents,
        system_instruction: request
            .system
            .as_ref()
            .map(|s| s.joined_text())
            .filter(|s| !s.is_empty())
            .map(|text| gemini::Content {
                role: None,
                parts: vec![gemini::Part::text(text)],
            }),
        generation_config: Some(gemini::GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop_sequences.clone(),
            extra: Default::default(),
        }),
        tools: request.tools.as_ref().map(|tools| {
            json!([{ "functionDeclarations": tools.iter().map(|t| json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.input_schema,
            })).collect::<Vec<_>>() }])
        }),
        tool_config: None,
        safety_settings: None,
        extra: Default::default(),
    }
}

pub fn to_responses(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut input = Vec::new();
    for message in &request.messages {
        let mut text = String::new();
        for block in message.blocks() {
            match block {
                ContentBlock::Text { text: t, .. } => text.push_str(&t),
                ContentBlock::ToolUse { id, name, input: args } => input.push(json!({
                    "type": "function_call",
                    "call_id": id,
                    "name": name,
                    "arguments": serde_json::to_string(&args).unwrap_or_default(),
                })),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => input.push(json!({
                    "type": "function_call_output",
                    "call_id": tool_use_id,
                    "output": tool_result_to_text(&content.unwrap_or(JsonValue::Null)),
                })),
                _ => {}
            }
        }
        if !text.is_empty() {
            let (role, part_type) = if message.role == "assistant" {
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
    }

    let mut out = json!({
        "model": ctx.model,
        "input": input,
        "stream": ctx.stream,
    });
    if let Some(system) = &request.system {
        let text = system.joined_text();
        if !text.is_empty() {
            out["instructions"] = JsonValue::String(text);
        }
    }
    if let Some(max) = request.max_tokens {
        out["max_output_tokens"] = json!(max);
    }
    if let Some(t) = request.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(p) = request.top_p {
        out["top_p"] = json!(p);
    }
    if let Some(tools) = &request.tools {
        out["tools"] = JsonValue::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    })
                })
                .collect(),
        );
    }
    Ok(out)
}

pub fn to_kiro(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut turns = Vec::new();
    let mut tool_results = Vec::new();
    for message in &request.messages {
        let role = if message.role == "assistant" {
            KiroRole::Assistant
        } else {
            KiroRole::User
        };
        let mut text = String::new();
        for block in message.blocks() {
            match block {
                ContentBlock::Text { text: t, .. } => text.push_str(&t),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => tool_results.push(kiro_build::tool_result(
                    &tool_use_id,
                    tool_result_to_text(&content.unwrap_or(JsonValue::Null)),
                    is_error.unwrap_or(false),
                )),
                _ => {}
            }
        }
        turns.push(KiroTurn { role, text });
    }
    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| kiro_build::tool_spec(&t.name, t.description.as_deref(), t.input_schema.as_ref()))
            .collect()
    });
    Ok(kiro_build::build(
        KiroConversation {
            model: ctx.model.to_string(),
            system: request
                .system
                .as_ref()
                .map(|s| s.joined_text())
                .filter(|s| !s.is_empty()),
            turns,
            tools,
            tool_results: (!tool_results.is_empty()).then_some(tool_results),
        },
        ctx.creds,
    ))
}
