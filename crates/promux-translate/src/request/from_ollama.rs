//! Ollama /api/chat client payloads mapped to the provider dialects. The
//! smallest client dialect: plain text turns, optional base64 images, an
//! `options` bag for sampling.

use promux_protocol::ollama::{ChatMessage, ChatRequest};
use promux_protocol::WireFormat;
use serde_json::{json, Value as JsonValue};

use crate::error::TranslateError;
use crate::registry::RequestCtx;
use crate::request::kiro_build::{self, KiroConversation, KiroRole, KiroTurn};
use crate::request::{antigravity_envelope, DEFAULT_MAX_TOKENS};

fn parse(ctx: &RequestCtx<'_>) -> Result<ChatRequest, TranslateError> {
    serde_json::from_value(ctx.body.clone())
        .map_err(|err| TranslateError::invalid(WireFormat::Ollama, err))
}

fn system_text(request: &ChatRequest) -> Option<String> {
    let texts: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .filter(|t| !t.is_empty())
        .collect();
    (!texts.is_empty()).then(|| texts.join("\n"))
}

fn turns(request: &ChatRequest) -> impl Iterator<Item = &ChatMessage> {
    request.messages.iter().filter(|m| m.role != "system")
}

pub fn to_openai(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut messages: Vec<JsonValue> = Vec::new();
    if let Some(system) = system_text(&request) {
        messages.push(json!({"role": "system", "content": system}));
    }
    for message in turns(&request) {
        match &message.images {
            Some(images) if !images.is_empty() => {
                let mut parts = vec![json!({"type": "text", "text": message.content})];
                for image in images {
                    parts.push(json!({"type": "image_url", "image_url": {
                        "url": format!("data:image/png;base64,{image}"),
                    }}));
                }
                messages.push(json!({"role": message.role, "content": parts}));
            }
            _ => messages.push(json!({"role": message.role, "content": message.content})),
        }
    }

    let options = request.options.clone().unwrap_or_default();
    let mut out = json!({
        "model": ctx.model,
        "messages": messages,
        "stream": ctx.stream,
    });
    if ctx.stream {
        out["stream_options"] = json!({"include_usage": true});
    }
    if let Some(t) = options.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(p) = options.top_p {
        out["top_p"] = json!(p);
    }
    if let Some(max) = options.num_predict {
        out["max_tokens"] = json!(max);
    }
    if let Some(stop) = &options.stop {
        out["stop"] = json!(stop);
    }
    if let Some(tools) = &request.tools {
        out["tools"] = tools.clone();
    }
    Ok(out)
}

pub fn to_claude(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut messages: Vec<JsonValue> = Vec::new();
    for message in turns(&request) {
        let role = if message.role == "assistant" {
            "assistant"
        } else {
            "user"
        };
        match &message.images {
            Some(images) if !images.is_empty() => {
                let mut blocks = vec![json!({"type": "text", "text": message.content})];
                for image in images {
                    blocks.push(json!({"type": "image", "source": {
                        "type": "base64",
                        "media_type": "image/png",
                        "data": image,
                    }}));
                }
                messages.push(json!({"role": role, "content": blocks}));
            }
            _ => messages.push(json!({"role": role, "content": message.content})),
        }
    }

    let options = request.options.clone().unwrap_or_default();
    let mut out = json!({
        "model": ctx.model,
        "max_tokens": options.num_predict.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
        "stream": ctx.stream,
    });
    if let Some(system) = system_text(&request) {
        out["system"] = JsonValue::String(system);
    }
    if let Some(t) = options.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(p) = options.top_p {
        out["top_p"] = json!(p);
    }
    if let Some(stop) = &options.stop {
        out["stop_sequences"] = json!(stop);
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
    let mut contents: Vec<JsonValue> = Vec::new();
    for message in turns(&request) {
        let role = if message.role == "assistant" {
            "model"
        } else {
            "user"
        };
        let mut parts = Vec::new();
        if !message.content.is_empty() {
            parts.push(json!({"text": message.content}));
        }
        for image in message.images.iter().flatten() {
            parts.push(json!({"inlineData": {"mimeType": "image/png", "data": image}}));
        }
        if !parts.is_empty() {
            contents.push(json!({"role": role, "parts": parts}));
        }
    }

    let options = request.options.clone().unwrap_or_default();
    let mut body = json!({"contents": contents});
    if let Some(system) = system_text(&request) {
        body["systemInstruction"] = json!({"parts": [{"text": system}]});
    }
    let mut config = serde_json::Map::new();
    if let Some(t) = options.temperature {
        config.insert("temperature".to_string(), json!(t));
    }
    if let Some(p) = options.top_p {
        config.insert("topP".to_string(), json!(p));
    }
    if let Some(max) = options.num_predict {
        config.insert("maxOutputTokens".to_string(), json!(max));
    }
    if let Some(stop) = &options.stop {
        config.insert("stopSequences".to_string(), json!(stop));
    }
    if !config.is_empty() {
        body["generationConfig"] = JsonValue::Object(config);
    }
    Ok(body)
}

pub fn to_responses(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let mut input = Vec::new();
    for message in turns(&request) {
        let (role, part_type) = if message.role == "assistant" {
            ("assistant", "output_text")
        } else {
            ("user", "input_text")
        };
        if !message.content.is_empty() {
            input.push(json!({
                "type": "message",
                "role": role,
                "content": [{"type": part_type, "text": message.content}],
            }));
        }
    }

    let options = request.options.clone().unwrap_or_default();
    let mut out = json!({
        "model": ctx.model,
        "input": input,
        "stream": ctx.stream,
    });
    if let Some(system) = system_text(&request) {
        out["instructions"] = JsonValue::String(system);
    }
    if let Some(max) = options.num_predict {
        out["max_output_tokens"] = json!(max);
    }
    if let Some(t) = options.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(p) = options.top_p {
        out["top_p"] = json!(p);
    }
    Ok(out)
}

pub fn to_kiro(ctx: &RequestCtx<'_>) -> Result<JsonValue, TranslateError> {
    let request = parse(ctx)?;
    let turns_vec = turns(&request)
        .map(|message| KiroTurn {
            role: if message.role == "assistant" {
                KiroRole::Assistant
            } else {
                KiroRole::User
            },
            text: message.content.clone(),
        })
        .collect();
    Ok(kiro_build::build(
        KiroConversation {
            model: ctx.model.to_string(),
            system: system_text(&request),
            turns: turns_vec,
            tools: None,
            tool_results: None,
        },
        ctx.creds,
    ))
}
