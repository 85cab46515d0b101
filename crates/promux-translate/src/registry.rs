use std::collections::HashMap;

use promux_protocol::WireFormat;
use serde_json::{Map, Value as JsonValue};

use crate::error::TranslateError;
use crate::request::{from_claude, from_gemini, from_ollama, from_openai, from_responses};
use crate::state::StreamState;
use crate::stream;

/// Inputs of a request-direction translation.
pub struct RequestCtx<'a> {
    /// Upstream model id (provider prefix already stripped).
    pub model: &'a str,
    /// Client payload as received.
    pub body: &'a JsonValue,
    pub stream: bool,
    /// The connection's `providerSpecificData` bag, for dialects that embed
    /// credential material in the payload (e.g. Kiro's `profileArn`).
    pub creds: Option<&'a Map<String, JsonValue>>,
}

pub type RequestFn = fn(&RequestCtx<'_>) -> Result<JsonValue, TranslateError>;
pub type StreamFn = fn(Option<&JsonValue>, &mut StreamState) -> Vec<JsonValue>;

/// The two dispatch tables. Built once at startup; lookups are by the
/// `(source, target)` pair, where mid-stream detection may substitute the
/// response-side source.
pub struct TranslateRegistry {
    requests: HashMap<(WireFormat, WireFormat), RequestFn>,
    streams: HashMap<(WireFormat, WireFormat), StreamFn>,
}

impl TranslateRegistry {
    pub fn new() -> Self {
        use WireFormat::*;

        let mut requests: HashMap<(WireFormat, WireFormat), RequestFn> = HashMap::new();
        let mut r = |src, dst, f: RequestFn| {
            requests.insert((src, dst), f);
        };
        r(OpenAI, Claude, from_openai::to_claude);
        r(OpenAI, Gemini, from_openai::to_gemini);
        r(OpenAI, OpenAIResponses, from_openai::to_responses);
        r(OpenAI, Kiro, from_openai::to_kiro);
        r(OpenAI, Antigravity, from_openai::to_antigravity);

        r(Claude, OpenAI, from_claude::to_openai);
        r(Claude, Gemini, from_claude::to_gemini);
        r(Claude, OpenAIResponses, from_claude::to_responses);
        r(Claude, Kiro, from_claude::to_kiro);
        r(Claude, Antigravity, from_claude::to_antigravity);

        r(Gemini, OpenAI, from_gemini::to_openai);
        r(Gemini, Claude, from_gemini::to_claude);
        r(Gemini, OpenAIResponses, from_gemini::to_responses);
        r(Gemini, Kiro, from_gemini::to_kiro);
        r(Gemini, Antigravity, from_gemini::to_antigravity);

        r(OpenAIResponses, OpenAI, from_responses::to_openai);
        r(OpenAIResponses, Claude, from_responses::to_claude);
        r(OpenAIResponses, Gemini, from_responses::to_gemini);
        r(OpenAIResponses, Kiro, from_responses::to_kiro);
        r(OpenAIResponses, Antigravity, from_responses::to_antigravity);

        r(Ollama, OpenAI, from_ollama::to_openai);
        r(Ollama, Claude, from_ollama::to_claude);
        r(Ollama, Gemini, from_ollama::to_gemini);
        r(Ollama, OpenAIResponses, from_ollama::to_responses);
        r(Ollama, Kiro, from_ollama::to_kiro);
        r(Ollama, Antigravity, from_ollama::to_antigravity);

        let mut streams: HashMap<(WireFormat, WireFormat), StreamFn> = HashMap::new();
        let sources: [(WireFormat, StreamFn); 4] = [
            (OpenAI, stream::from_openai::translate),
            (Claude, stream::from_claude::translate),
            (Gemini, stream::from_gemini::translate),
            (OpenAIResponses, stream::from_responses::translate),
        ];
        let targets = [OpenAI, OpenAIResponses, Claude, Gemini, Ollama];
        for (src, f) in sources {
            for dst in targets {
                if src == dst {
                    continue;
                }
                streams.insert((src, dst), f);
            }
        }

        Self { requests, streams }
    }

    pub fn request(
        &self,
        src: WireFormat,
        dst: WireFormat,
    ) -> Result<RequestFn, TranslateError> {
        self.requests
            .get(&(src, dst))
            .copied()
            .ok_or(TranslateError::UnsupportedPair { src, dst })
    }

    /// Response-direction lookup; providers with wrapper dialects resolve to
    /// the stream dialect they actually emit.
    pub fn stream(&self, src: WireFormat, dst: WireFormat) -> Result<StreamFn, TranslateError> {
        let src = src.stream_dialect();
        self.streams
            .get(&(src, dst))
            .copied()
            .ok_or(TranslateError::UnsupportedPair { src, dst })
    }

    pub fn translate_request(
        &self,
        src: WireFormat,
        dst: WireFormat,
        ctx: &RequestCtx<'_>,
    ) -> Result<JsonValue, TranslateError> {
        (self.request(src, dst)?)(ctx)
    }
}

impl Default for TranslateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
