use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Every wire dialect the proxy speaks. The first five are client-facing;
/// `Kiro` and `Antigravity` only ever appear as upstream targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    OpenAI,
    OpenAIResponses,
    Claude,
    Gemini,
    Ollama,
    Kiro,
    Antigravity,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::OpenAI => "openai",
            WireFormat::OpenAIResponses => "openai_responses",
            WireFormat::Claude => "claude",
            WireFormat::Gemini => "gemini",
            WireFormat::Ollama => "ollama",
            WireFormat::Kiro => "kiro",
            WireFormat::Antigravity => "antigravity",
        }
    }

    pub fn is_client_format(&self) -> bool {
        !matches!(self, WireFormat::Kiro | WireFormat::Antigravity)
    }

    /// The dialect an upstream response stream actually carries. Kiro serves
    /// Anthropic-shaped events, Antigravity serves Gemini chunks.
    pub fn stream_dialect(&self) -> WireFormat {
        match self {
            WireFormat::Kiro => WireFormat::Claude,
            WireFormat::Antigravity => WireFormat::Gemini,
            other => *other,
        }
    }

    /// Identify the client protocol from the request path (after any machine
    /// prefix has been stripped).
    pub fn from_request_path(path: &str) -> Option<WireFormat> {
        if path.ends_with("/chat/completions") {
            return Some(WireFormat::OpenAI);
        }
        if path.ends_with("/v1/messages") || path.ends_with("/messages") {
            return Some(WireFormat::Claude);
        }
        if path.ends_with("/v1/responses") || path.ends_with("/responses") {
            return Some(WireFormat::OpenAIResponses);
        }
        if path.contains("/v1beta/") {
            return Some(WireFormat::Gemini);
        }
        if path.ends_with("/api/chat") {
            return Some(WireFormat::Ollama);
        }
        None
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural sniffing of a parsed response chunk. Used mid-stream to catch
/// "OpenAI-compatible" endpoints that actually emit a different dialect.
pub fn detect_chunk_format(chunk: &JsonValue) -> Option<WireFormat> {
    let obj = chunk.as_object()?;
    if let Some(kind) = obj.get("type").and_then(JsonValue::as_str) {
        if kind.starts_with("response.") {
            return Some(WireFormat::OpenAIResponses);
        }
        return Some(WireFormat::Claude);
    }
    if obj.contains_key("choices") {
        return Some(WireFormat::OpenAI);
    }
    if obj.contains_key("candidates") {
        return Some(WireFormat::Gemini);
    }
    if obj.contains_key("message") && obj.contains_key("done") {
        return Some(WireFormat::Ollama);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_identification() {
        assert_eq!(
            WireFormat::from_request_path("/v1/chat/completions"),
            Some(WireFormat::OpenAI)
        );
        assert_eq!(
            WireFormat::from_request_path("/v1/messages"),
            Some(WireFormat::Claude)
        );
        assert_eq!(
            WireFormat::from_request_path("/v1/responses"),
            Some(WireFormat::OpenAIResponses)
        );
        assert_eq!(
            WireFormat::from_request_path("/v1beta/models/gemini-2.5-pro:streamGenerateContent"),
            Some(WireFormat::Gemini)
        );
        assert_eq!(
            WireFormat::from_request_path("/v1/api/chat"),
            Some(WireFormat::Ollama)
        );
        assert_eq!(WireFormat::from_request_path("/health"), None);
    }

    #[test]
    fn chunk_detection_markers() {
        assert_eq!(
            detect_chunk_format(&json!({"type": "response.output_text.delta", "delta": "x"})),
            Some(WireFormat::OpenAIResponses)
        );
        assert_eq!(
            detect_chunk_format(&json!({"type": "message_start", "message": {}})),
            Some(WireFormat::Claude)
        );
        assert_eq!(
            detect_chunk_format(&json!({"choices": [{"delta": {"content": "hi"}}]})),
            Some(WireFormat::OpenAI)
        );
        assert_eq!(
            detect_chunk_format(&json!({"candidates": [{"content": {"parts": []}}]})),
            Some(WireFormat::Gemini)
        );
        assert_eq!(
            detect_chunk_format(&json!({"message": {"content": "hi"}, "done": false})),
            Some(WireFormat::Ollama)
        );
        assert_eq!(detect_chunk_format(&json!({"usage": {}})), None);
    }
}
