//! Request-direction translation, one module per client dialect.

pub mod from_claude;
pub mod from_gemini;
pub mod from_ollama;
pub mod from_openai;
pub mod from_responses;
pub(crate) mod kiro_build;

use serde_json::{json, Map, Value as JsonValue};

/// Anthropic requires `max_tokens`; applied when the client dialect did not
/// carry a limit.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Tool-call arguments travel as text in OpenAI-style dialects; decode when
/// the target wants structured input.
pub(crate) fn decode_args(raw: &str) -> JsonValue {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
}

/// `data:<media>;base64,<payload>` -> (media type, payload).
pub(crate) fn parse_data_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let media = meta.strip_suffix(";base64")?;
    Some((media.to_string(), payload.to_string()))
}

/// Antigravity wraps a Gemini body; `project`, `sessionId`, `requestId` and
/// the default tool config are injected by the executor.
pub(crate) fn antigravity_envelope(model: &str, gemini_body: JsonValue) -> JsonValue {
    json!({"model": model, "request": gemini_body})
}

pub(crate) fn tool_result_to_text(content: &JsonValue) -> String {
    match content {
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(JsonValue::as_str) {
                    out.push_str(text);
                } else if let Ok(raw) = serde_json::to_string(part) {
                    out.push_str(&raw);
                }
            }
            out
        }
        JsonValue::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

pub(crate) fn creds_str<'a>(
    creds: Option<&'a Map<String, JsonValue>>,
    key: &str,
) -> Option<&'a str> {
    creds?.get(key)?.as_str().filter(|s| !s.is_empty())
}
