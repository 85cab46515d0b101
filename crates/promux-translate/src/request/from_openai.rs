//! OpenAI chat-completions client payloads mapped to the provider dialects.

use promux_protocol::claude;
use promux_protocol::gemini;
use promux_protocol::openai::{
    ChatCompletionRequest, ChatMessage, ContentPart, MessageContent,
};
use promux_protocol::WireFormat;
use serde_json::{json, Value as JsonValue};

use crate::error::TranslateError;
use crate::registry::RequestCtx;
use crate::request::kiro_build::{self, KiroConversation, KiroRole, KiroTurn};
use crate::request::{antigravity_envelope, decode_args, parse_data_uri, DEFAULT_MAX_TOKENS};

fn parse(ctx: &RequestCtx<'_>) -> Result<ChatCompletionRequest, TranslateError> {
    serde_json::from_value(ctx.body.clone())
        .map_err(|err| TranslateError::invalid(WireFormat::OpenAI, err))
}

fn system_text(request: &ChatCompletionRequest) -> Option<String> {
    let texts: Vec<String> = request
        .messages
        .iter()
        .filter(|m| m.role == "system" || m.role == "developer")
        .map(ChatMessage::content_text)
        .filter(|t| !t.is_empty())
        .collect();
    (!texts.is_empty()).then(|| texts.join("\n"))
}

pub fn to_claude(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut messages: Vec<claude::MessageParam> = Vec::new();

    let mut push_blocks = |role: &str, blocks: Vec<claude::ContentBlock>| {
        if blocks.is_empty() {
            return;
        }
        match messages.last_mut() {
            Some(last) if last.role == role => {
                let mut existing = last.blocks();
                existing.extend(blocks);
                last.content = claude::MessageContent::Blocks(existing);
            }
            _ => messages.push(claude::MessageParam {
                role: role.to_string(),
                content: claude::MessageContent::Blocks(blocks),
            }),
        }
    };

    for message in &request.messages {
        match message.role.as_str() {
            "system" | "developer" => {}
            "assistant" => {
                let mut blocks = Vec::new();
                let text = message.content_text();
                if !text.is_empty() {
                    blocks.push(claude::ContentBlock::Text {
                        text,
                        extra: Default::default(),
                    });
                }
                for (i, tc) in message.tool_calls.iter().flatten().enumerate() {
                    blocks.push(claude::ContentBlock::ToolUse {
                        id: tc.id.clone().unwrap_or_else(|| format!("call_{}", i + 1)),
                        name: tc.function.name.clone().unwrap_or_default(),
                        input: decode_args(tc.function.arguments.as_deref().unwrap_or("")),
                    });
                }
                push_blocks("assistant", blocks);
            }
            "tool" => {
                push_blocks(
                    "user",
                    vec![claude::ContentBlock::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: Some(JsonValue::String(message.content_text())),
                        is_error: None,
                    }],
                );
            }
            _ => push_blocks("user", user_blocks(message)),
        }
    }

    let request_out = claude::MessagesRequest {
        model: ctx.model.to_string(),
        max_tokens: Some(request.max_output_tokens().unwrap_or(DEFAULT_MAX_TOKENS)),
        messages,
        system: system_text(&request).map(claude::SystemParam::Text),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.as_ref().map(|s| s.to_vec()),
        stream: ctx.stream.then_some(true),
        tools: request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| claude::Tool {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    input_schema: t.function.parameters.clone(),
                })
                .collect()
        }),
        tool_choice: request.tool_choice.as_ref().map(map_tool_choice_claude),
        thinking: None,
        extra: Default::default(),
    };
    serde_json::to_value(request_out).map_err(|err| TranslateError::invalid(WireFormat::Claude, err))
}

fn user_blocks(message: &ChatMessage) -> Vec<claude::ContentBlock> {
    let mut blocks = Vec::new();
    match &message.content {
        Some(MessageContent::Text(text)) if !text.is_empty() => {
            blocks.push(claude::ContentBlock::Text {
                text: text.clone(),
                extra: Default::default(),
            });
        }
        Some(MessageContent::Parts(parts)) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => blocks.push(claude::ContentBlock::Text {
                        text: text.clone(),
                        extra: Default::default(),
                    }),
                    ContentPart::ImageUrl { image_url } => {
                        let source = match parse_data_uri(&image_url.url) {
                            Some((media_type, data)) => {
                                claude::ImageSource::Base64 { media_type, data }
                            }
                            None => claude::ImageSource::Url {
                                url: image_url.url.clone(),
                            },
                        };
                        blocks.push(claude::ContentBlock::Image { source });
                    }
                }
            }
        }
        _ => {}
    }
    blocks
}

fn map_tool_choice_claude(choice: &JsonValue) -> JsonValue {
    match choice {
        JsonValue::String(mode) => match mode.as_str() {
            "none" => json!({"type": "none"}),
            "required" => json!({"type": "any"}),
            _ => json!({"type": "auto"}),
        },
        JsonValue::Object(obj) => {
            match obj
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(JsonValue::as_str)
            {
                Some(name) => json!({"type": "tool", "name": name}),
                None => json!({"type": "auto"}),
            }
        }
        _ => json!({"type": "auto"}),
    }
}

pub fn to_gemini(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    serde_json::to_value(gemini_body(&request))
        .map_err(|err| TranslateError::invalid(WireFormat::Gemini, err))
}

/// Model and stream flag ride in the URL (or the Antigravity envelope), not
/// in the Gemini body itself.
pub fn to_antigravity(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let body = serde_json::to_value(gemini_body(&request))
        .map_err(|err| TranslateError::invalid(WireFormat::Antigravity, err))?;
    Ok(antigravity_envelope(ctx.model, body))
}

fn gemini_body(request: &ChatCompletionRequest) -> gemini::GenerateContentRequest {
    let mut contents: Vec<gemini::Content> = Vec::new();
    for message in &request.messages {
        match message.role.as_str() {
            "system" | "developer" => {}
            "assistant" => {
                let mut parts = Vec::new();
                let text = message.content_text();
                if !text.is_empty() {
                    parts.push(gemini::Part::text(text));
                }
                for tc in message.tool_calls.iter().flatten() {
                    parts.push(gemini::Part {
                        function_call: Some(gemini::FunctionCall {
                            name: tc.function.name.clone().unwrap_or_default(),
                            args: decode_args(tc.function.arguments.as_deref().unwrap_or("")),
                            id: tc.id.clone(),
                        }),
                        ..Default::default()
                    });
                }
                if !parts.is_empty() {
                    contents.push(gemini::Content {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
            }
            "tool" => {
                let response = json!({"result": message.content_text()});
                contents.push(gemini::Content {
                    role: Some("user".to_string()),
                    parts: vec![gemini::Part {
                        function_response: Some(gemini::FunctionResponse {
                            name: message
                                .name
                                .clone()
                                .or_else(|| message.tool_call_id.clone())
                                .unwrap_or_else(|| "tool".to_string()),
                            response,
                            id: message.tool_call_id.clone(),
                        }),
                        ..Default::default()
                    }],
                });
            }
            _ => {
                let parts = gemini_user_parts(message);
                if !parts.is_empty() {
                    contents.push(gemini::Content {
                        role: Some("user".to_string()),
                        parts,
                    });
                }
            }
        }
    }

    gemini::GenerateContentRequest {
        contents,
        system_instruction: system_text(request).map(|text| gemini::Content {
            role: None,
            parts: vec![gemini::Part::text(text)],
        }),
        generation_config: Some(gemini::GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_output_tokens(),
            stop_sequences: request.stop.as_ref().map(|s| s.to_vec()),
            extra: Default::default(),
        }),
        tools: request.tools.as_ref().map(|tools| {
            json!([{ "functionDeclarations": tools.iter().map(|t| json!({
                "name": t.function.name,
                "description": t.function.description,
                "parameters": t.function.parameters,
            })).collect::<Vec<_>>() }])
        }),
        tool_config: request.tool_choice.as_ref().and_then(gemini_tool_config),
        safety_settings: None,
        extra: Default::default(),
    }
}

fn gemini_user_parts(message: &ChatMessage) -> Vec<gemini::Part> {
    let mut parts = Vec::new();
    match &message.content {
        Some(MessageContent::Text(text)) if !text.is_empty() => {
            parts.push(gemini::Part::text(text.clone()));
        }
        Some(MessageContent::Parts(content_parts)) => {
            for part in content_parts {
                match part {
                    ContentPart::Text { text } => parts.push(gemini::Part::text(text.clone())),
                    ContentPart::ImageUrl { image_url } => {
                        if let Some((mime_type, data)) = parse_data_uri(&image_url.url) {
                            parts.push(gemini::Part {
                                inline_data: Some(gemini::InlineData { mime_type, data }),
                                ..Default::default()
                            });
                        }
                    }
                }
            }
        }
        _ => {}
    }
    parts
}

fn gemini_tool_config(choice: &JsonValue) -> Option<JsonValue> {
    let mode = match choice {
        JsonValue::String(mode) => match mode.as_str() {
            "none" => "NONE",
            "required" => "ANY",
            _ => "AUTO",
        },
        JsonValue::Object(_) => "ANY",
        _ => return None,
    };
    Some(json!({"functionCallingConfig": {"mode": mode}}))
}

pub fn to_responses(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut input = Vec::new();
    for message in &request.messages {
        match message.role.as_str() {
            "system" | "developer" => {}
            "assistant" => {
                let text = message.content_text();
                if !text.is_empty() {
                    input.push(json!({
                        "type": "message",
                        "role": "assistant",
                        "content": [{"type": "output_text", "text": text}],
                    }));
                }
                for (i, tc) in message.tool_calls.iter().flatten().enumerate() {
                    input.push(json!({
                        "type": "function_call",
                        "call_id": tc.id.clone().unwrap_or_else(|| format!("call_{}", i + 1)),
                        "name": tc.function.name,
                        "arguments": tc.function.arguments.clone().unwrap_or_default(),
                    }));
                }
            }
            "tool" => input.push(json!({
                "type": "function_call_output",
                "call_id": message.tool_call_id,
                "output": message.content_text(),
            })),
            _ => input.push(json!({
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": message.content_text()}],
            })),
        }
    }

    let mut out = json!({
        "model": ctx.model,
        "input": input,
        "stream": ctx.stream,
    });
    if let Some(instructions) = system_text(&request) {
        out["instructions"] = JsonValue::String(instructions);
    }
    if let Some(max) = request.max_output_tokens() {
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
                        "name": t.function.name,
                        "description": t.function.description,
                        "parameters": t.function.parameters,
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
        match message.role.as_str() {
            "system" | "developer" => {}
            "assistant" => turns.push(KiroTurn {
                role: KiroRole::Assistant,
                text: message.content_text(),
            }),
            "tool" => tool_results.push(kiro_build::tool_result(
                message.tool_call_id.as_deref().unwrap_or_default(),
                message.content_text(),
                false,
            )),
            _ => turns.push(KiroTurn {
                role: KiroRole::User,
                text: message.content_text(),
            }),
        }
    }
    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| {
                kiro_build::tool_spec(
                    &t.function.name,
                    t.function.description.as_deref(),
                    t.function.parameters.as_ref(),
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
            tool_results: (!tool_results.is_empty()).then_some(tool_results),
        },
        ctx.creds,
    ))
}
