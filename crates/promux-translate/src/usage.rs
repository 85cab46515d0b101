//! Token usage capture, estimation and per-format rendering.

use promux_protocol::WireFormat;
use serde_json::{json, Value as JsonValue};

/// Fixed character-per-token ratio used when a provider omits usage. Coarse
/// and language-insensitive; a tunable, not a constant of nature.
pub const ESTIMATE_CHARS_PER_TOKEN: usize = 4;
/// Additive buffer applied to each estimated side before reporting.
pub const ESTIMATE_TOKEN_BUFFER: u32 = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTally {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

impl UsageTally {
    pub fn new(input: u32, output: u32) -> Self {
        Self {
            input_tokens: Some(input),
            output_tokens: Some(output),
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }

    pub fn merge(&mut self, incoming: UsageTally) {
        if incoming.input_tokens.is_some() {
            self.input_tokens = incoming.input_tokens;
        }
        if incoming.output_tokens.is_some() {
            self.output_tokens = incoming.output_tokens;
        }
    }
}

pub fn estimate_usage(input_chars: usize, output_chars: usize) -> UsageTally {
    let estimate = |chars: usize| (chars / ESTIMATE_CHARS_PER_TOKEN) as u32 + ESTIMATE_TOKEN_BUFFER;
    UsageTally::new(estimate(input_chars), estimate(output_chars))
}

/// Usage rendered with only the fields the client format models.
pub fn usage_json(format: WireFormat, usage: &UsageTally) -> JsonValue {
    let input = usage.input_tokens.unwrap_or(0);
    let output = usage.output_tokens.unwrap_or(0);
    match format {
        WireFormat::OpenAI => json!({
            "prompt_tokens": input,
            "completion_tokens": output,
            "total_tokens": input + output,
        }),
        WireFormat::OpenAIResponses => json!({
            "input_tokens": input,
            "output_tokens": output,
            "total_tokens": input + output,
        }),
        WireFormat::Claude | WireFormat::Kiro => json!({
            "input_tokens": input,
            "output_tokens": output,
        }),
        WireFormat::Gemini | WireFormat::Antigravity => json!({
            "promptTokenCount": input,
            "candidatesTokenCount": output,
            "totalTokenCount": input + output,
        }),
        WireFormat::Ollama => json!({
            "prompt_eval_count": input,
            "eval_count": output,
        }),
    }
}

/// Semantic facts extracted from one parsed chunk of `format`. Drives the
/// engine's accounting, the empty-chunk filter and finish detection without
/// running a translator (passthrough mode).
#[derive(Debug, Clone, Default)]
pub struct ChunkFacts {
    pub content: String,
    pub thinking: String,
    pub tool_delta: bool,
    pub finish: Option<String>,
    pub usage: Option<UsageTally>,
}

impl ChunkFacts {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
            && self.thinking.is_empty()
            && !self.tool_delta
            && self.finish.is_none()
            && self.usage.is_none()
    }
}

pub fn extract_chunk_facts(format: WireFormat, chunk: &JsonValue) -> ChunkFacts {
    match format {
        WireFormat::OpenAI => openai_facts(chunk),
        WireFormat::Claude | WireFormat::Kiro => claude_facts(chunk),
        WireFormat::Gemini | WireFormat::Antigravity => gemini_facts(chunk),
        WireFormat::OpenAIResponses => responses_facts(chunk),
        WireFormat::Ollama => ollama_facts(chunk),
    }
}

fn openai_facts(chunk: &JsonValue) -> ChunkFacts {
    let mut facts = ChunkFacts::default();
    if let Some(choices) = chunk.get("choices").and_then(JsonValue::as_array) {
        for choice in choices {
            let delta = &choice["delta"];
            if let Some(text) = delta.get("content").and_then(JsonValue::as_str) {
                facts.content.push_str(text);
            }
            if let Some(text) = delta.get("reasoning_content").and_then(JsonValue::as_str) {
                facts.thinking.push_str(text);
            }
            if delta
                .get("tool_calls")
                .and_then(JsonValue::as_array)
                .is_some_and(|calls| !calls.is_empty())
            {
                facts.tool_delta = true;
            }
            if let Some(reason) = choice.get("finish_reason").and_then(JsonValue::as_str) {
                facts.finish = Some(reason.to_string());
            }
        }
    }
    if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
        facts.usage = Some(UsageTally {
            input_tokens: usage.get("prompt_tokens").and_then(as_u32),
            output_tokens: usage.get("completion_tokens").and_then(as_u32),
        });
    }
    facts
}

fn claude_facts(chunk: &JsonValue) -> ChunkFacts {
    let mut facts = ChunkFacts::default();
    match chunk.get("type").and_then(JsonValue::as_str) {
        Some("content_block_delta") => {
            let delta = &chunk["delta"];
            match delta.get("type").and_then(JsonValue::as_str) {
                Some("text_delta") => {
                    if let Some(text) = delta.get("text").and_then(JsonValue::as_str) {
                        facts.content.push_str(text);
                    }
                }
                Some("thinking_delta") => {
                    if let Some(text) = delta.get("thinking").and_then(JsonValue::as_str) {
                        facts.thinking.push_str(text);
                    }
                }
                Some("input_json_delta") => facts.tool_delta = true,
                _ => {}
            }
        }
        Some("content_block_start") => {
            if chunk["content_block"]["type"] == "tool_use" {
                facts.tool_delta = true;
            }
        }
        Some("message_start") => {
            facts.usage = claude_usage(chunk["message"].get("usage"));
        }
        Some("message_delta") => {
            if let Some(reason) = chunk["delta"].get("stop_reason").and_then(JsonValue::as_str) {
                facts.finish = Some(normalize_claude_stop(reason));
            }
            facts.usage = claude_usage(chunk.get("usage"));
        }
        _ => {}
    }
    facts
}

fn claude_usage(usage: Option<&JsonValue>) -> Option<UsageTally> {
    let usage = usage.filter(|u| u.is_object())?;
    let tally = UsageTally {
        input_tokens: usage.get("input_tokens").and_then(as_u32),
        output_tokens: usage.get("output_tokens").and_then(as_u32),
    };
    (tally.input_tokens.is_some() || tally.output_tokens.is_some()).then_some(tally)
}

fn gemini_facts(chunk: &JsonValue) -> ChunkFacts {
    let mut facts = ChunkFacts::default();
    if let Some(candidates) = chunk.get("candidates").and_then(JsonValue::as_array) {
        for candidate in candidates {
            if let Some(parts) = candidate["content"]["parts"].as_array() {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(JsonValue::as_str) {
                        if part.get("thought").and_then(JsonValue::as_bool) == Some(true) {
                            facts.thinking.push_str(text);
                        } else {
                            facts.content.push_str(text);
                        }
                    }
                    if part.get("functionCall").is_some() {
                        facts.tool_delta = true;
                    }
                }
            }
            if let Some(reason) = candidate.get("finishReason").and_then(JsonValue::as_str) {
                facts.finish = Some(normalize_gemini_finish(reason));
            }
        }
    }
    if let Some(usage) = chunk.get("usageMetadata").filter(|u| u.is_object()) {
        facts.usage = Some(UsageTally {
            input_tokens: usage.get("promptTokenCount").and_then(as_u32),
            output_tokens: usage.get("candidatesTokenCount").and_then(as_u32),
        });
    }
    facts
}

fn responses_facts(chunk: &JsonValue) -> ChunkFacts {
    let mut facts = ChunkFacts::default();
    match chunk.get("type").and_then(JsonValue::as_str) {
        Some("response.output_text.delta") => {
            if let Some(text) = chunk.get("delta").and_then(JsonValue::as_str) {
                facts.content.push_str(text);
            }
        }
        Some("response.reasoning_summary_text.delta") | Some("response.reasoning_text.delta") => {
            if let Some(text) = chunk.get("delta").and_then(JsonValue::as_str) {
                facts.thinking.push_str(text);
            }
        }
        Some("response.function_call_arguments.delta") => facts.tool_delta = true,
        Some("response.output_item.added") => {
            if chunk["item"]["type"] == "function_call" {
                facts.tool_delta = true;
            }
        }
        Some("response.completed") | Some("response.incomplete") | Some("response.failed") => {
            facts.finish = Some(match chunk["type"].as_str() {
                Some("response.completed") => "stop".to_string(),
                _ => "length".to_string(),
            });
            if let Some(usage) = chunk["response"].get("usage").filter(|u| u.is_object()) {
                facts.usage = Some(UsageTally {
                    input_tokens: usage.get("input_tokens").and_then(as_u32),
                    output_tokens: usage.get("output_tokens").and_then(as_u32),
                });
            }
        }
        _ => {}
    }
    facts
}

fn ollama_facts(chunk: &JsonValue) -> ChunkFacts {
    let mut facts = ChunkFacts::default();
    if let Some(message) = chunk.get("message") {
        if let Some(text) = message.get("content").and_then(JsonValue::as_str) {
            facts.content.push_str(text);
        }
        if let Some(text) = message.get("thinking").and_then(JsonValue::as_str) {
            facts.thinking.push_str(text);
        }
        if message.get("tool_calls").is_some() {
            facts.tool_delta = true;
        }
    }
    if chunk.get("done").and_then(JsonValue::as_bool) == Some(true) {
        facts.finish = Some(
            chunk
                .get("done_reason")
                .and_then(JsonValue::as_str)
                .unwrap_or("stop")
                .to_string(),
        );
        let tally = UsageTally {
            input_tokens: chunk.get("prompt_eval_count").and_then(as_u32),
            output_tokens: chunk.get("eval_count").and_then(as_u32),
        };
        if tally.input_tokens.is_some() || tally.output_tokens.is_some() {
            facts.usage = Some(tally);
        }
    }
    facts
}

pub fn normalize_claude_stop(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        other => other,
    }
    .to_string()
}

pub fn denormalize_claude_stop(reason: &str) -> String {
    match reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        other => other,
    }
    .to_string()
}

pub fn normalize_gemini_finish(reason: &str) -> String {
    match reason {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" => "content_filter",
        other => other,
    }
    .to_string()
}

pub fn denormalize_gemini_finish(reason: &str) -> String {
    match reason {
        "stop" | "tool_calls" => "STOP",
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        other => other,
    }
    .to_string()
}

fn as_u32(value: &JsonValue) -> Option<u32> {
    value.as_u64().map(|v| v.min(u32::MAX as u64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn estimates_follow_char_ratio() {
        let usage = estimate_usage(1200, 400);
        assert_eq!(usage.input_tokens, Some(300 + ESTIMATE_TOKEN_BUFFER));
        assert_eq!(usage.output_tokens, Some(100 + ESTIMATE_TOKEN_BUFFER));
    }

    #[test]
    fn openai_facts_capture_finish_and_usage() {
        let chunk = json!({
            "choices": [{"delta": {}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3}
        });
        let facts = extract_chunk_facts(WireFormat::OpenAI, &chunk);
        assert_eq!(facts.finish.as_deref(), Some("stop"));
        assert_eq!(facts.usage.unwrap().output_tokens, Some(3));
    }

    #[test]
    fn gemini_thought_parts_count_as_thinking() {
        let chunk = json!({
            "candidates": [{"content": {"parts": [
                {"text": "let me think", "thought": true},
                {"text": "answer"}
            ]}}]
        });
        let facts = extract_chunk_facts(WireFormat::Gemini, &chunk);
        assert_eq!(facts.thinking, "let me think");
        assert_eq!(facts.content, "answer");
    }

    #[test]
    fn empty_chunk_is_empty() {
        let facts = extract_chunk_facts(WireFormat::OpenAI, &json!({"choices": [{"delta": {}}]}));
        assert!(facts.is_empty());
    }

    #[test]
    fn usage_fields_filtered_per_format() {
        let tally = UsageTally::new(7, 5);
        let openai = usage_json(WireFormat::OpenAI, &tally);
        assert_eq!(openai["total_tokens"], 12);
        let claude = usage_json(WireFormat::Claude, &tally);
        assert!(claude.get("total_tokens").is_none());
        assert_eq!(claude["output_tokens"], 5);
        let gemini = usage_json(WireFormat::Gemini, &tally);
        assert_eq!(gemini["promptTokenCount"], 7);
        let ollama = usage_json(WireFormat::Ollama, &tally);
        assert_eq!(ollama["eval_count"], 5);
    }
}
