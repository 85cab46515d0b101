//! SSE stream engine: wraps the upstream byte stream and produces the client
//! byte stream. Translate mode runs the registered pair translator per data
//! line; passthrough mode normalises frames in place. Either way the client
//! stream ends with exactly one `data: [DONE]` and the completion callback
//! fires with the accumulated accounting.

use std::sync::Arc;

use bytes::Bytes;
use promux_protocol::{detect_chunk_format, SseParser, WireFormat};
use promux_translate::{
    estimate_usage, extract_chunk_facts, nonstream, StreamState, TranslateRegistry, UsageTally,
};
use promux_translate::usage::usage_json;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::debug;

pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Stream dialect the provider is configured to emit.
    pub source: WireFormat,
    /// Client dialect.
    pub target: WireFormat,
    /// Client-facing model name.
    pub model: String,
    /// Id used when the upstream never supplies one.
    pub fallback_id: String,
    /// Character length of the client request body, for usage estimation.
    pub input_chars: usize,
}

#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub content_len: usize,
    pub thinking_len: usize,
    pub usage: Option<UsageTally>,
    pub usage_estimated: bool,
    pub ttft: Option<OffsetDateTime>,
    pub detected: Option<WireFormat>,
    pub finish_reason: Option<String>,
    /// Client went away before the stream finished.
    pub cancelled: bool,
}

/// Wrap an upstream byte stream. The returned receiver is the client body;
/// dropping it cancels the transform and, through channel closure, the
/// upstream read. `on_complete` always runs, with partial accounting on
/// cancellation.
pub fn spawn_stream(
    registry: Arc<TranslateRegistry>,
    config: EngineConfig,
    mut upstream: mpsc::Receiver<Bytes>,
    on_complete: Box<dyn FnOnce(StreamOutcome) + Send>,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut task = EngineTask::new(registry, config, tx);
        let mut parser = SseParser::new();
        let mut client_gone = false;

        'read: while let Some(chunk) = upstream.recv().await {
            if task.ttft.is_none() {
                task.ttft = Some(OffsetDateTime::now_utc());
            }
            for event in parser.push_bytes(&chunk) {
                if !task.handle_data(&event.data).await {
                    client_gone = true;
                    break 'read;
                }
            }
        }
        if !client_gone {
            for event in parser.finish() {
                if !task.handle_data(&event.data).await {
                    client_gone = true;
                    break;
                }
            }
        }
        if !client_gone {
            client_gone = !task.flush().await;
        }
        on_complete(task.into_outcome(client_gone));
    });
    rx
}

struct EngineTask {
    registry: Arc<TranslateRegistry>,
    input_chars: usize,
    state: StreamState,
    content_chars: usize,
    thinking_chars: usize,
    ttft: Option<OffsetDateTime>,
    tx: mpsc::Sender<Bytes>,
}

impl EngineTask {
    fn new(registry: Arc<TranslateRegistry>, config: EngineConfig, tx: mpsc::Sender<Bytes>) -> Self {
        let created = OffsetDateTime::now_utc().unix_timestamp();
        let state = StreamState::new(
            config.source,
            config.target,
            &config.model,
            &config.fallback_id,
            created,
        );
        Self {
            registry,
            input_chars: config.input_chars,
            state,
            content_chars: 0,
            thinking_chars: 0,
            ttft: None,
            tx,
        }
    }

    /// Returns false once the client receiver is gone.
    async fn handle_data(&mut self, data: &str) -> bool {
        if data == "[DONE]" {
            // Swallowed here; the engine emits its own terminator.
            self.state.done_seen = true;
            return true;
        }
        let Ok(mut value) = serde_json::from_str::<JsonValue>(data) else {
            // Not JSON: pass through verbatim when no translation applies.
            if self.state.effective_source() == self.state.target {
                return self.send_raw(data).await;
            }
            return true;
        };

        if self.state.detected.is_none() {
            if let Some(found) = detect_chunk_format(&value) {
                if found != self.state.source {
                    debug!(configured = %self.state.source, detected = %found, "stream format mismatch");
                    self.state.detected = Some(found);
                }
            }
        }
        let effective = self.state.effective_source();

        let facts = extract_chunk_facts(effective, &value);
        self.content_chars += facts.content.chars().count();
        self.thinking_chars += facts.thinking.chars().count();
        if let Some(usage) = facts.usage {
            self.state.merge_usage(usage);
            self.state.usage_estimated = false;
        }
        if facts.finish.is_some() && self.state.usage.is_none() {
            self.estimate_usage();
        }

        if effective == self.state.target {
            // Passthrough: normalise, filter, rewrite the finish chunk.
            if facts.is_empty() {
                return true;
            }
            if let Some(reason) = &facts.finish {
                self.state.finish_reason = Some(reason.clone());
            }
            normalize_passthrough(self.state.target, &mut value, &self.state);
            if facts.finish.is_some() {
                if let Some(usage) = self.state.usage {
                    inject_usage(self.state.target, &mut value, &usage);
                }
            }
            return self.send_value(&value).await;
        }

        let Ok(translate) = self.registry.stream(effective, self.state.target) else {
            return true;
        };
        let chunks = translate(Some(&value), &mut self.state);
        for chunk in &chunks {
            if !self.send_value(chunk).await {
                return false;
            }
        }
        true
    }

    fn estimate_usage(&mut self) {
        self.state.usage = Some(estimate_usage(self.input_chars, self.content_chars));
        self.state.usage_estimated = true;
    }

    /// Terminal flush: translator flush call, then the guaranteed `[DONE]`.
    async fn flush(&mut self) -> bool {
        let effective = self.state.effective_source();
        if effective != self.state.target {
            if self.state.usage.is_none() {
                self.estimate_usage();
            }
            if let Ok(translate) = self.registry.stream(effective, self.state.target) {
                let chunks = translate(None, &mut self.state);
                for chunk in &chunks {
                    if !self.send_value(chunk).await {
                        return false;
                    }
                }
            }
        }
        self.tx.send(Bytes::from_static(DONE_FRAME)).await.is_ok()
    }

    async fn send_value(&mut self, value: &JsonValue) -> bool {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(_) => return true,
        };
        let mut frame = Vec::with_capacity(payload.len() + 32);
        if matches!(
            self.state.target,
            WireFormat::Claude | WireFormat::OpenAIResponses
        ) {
            if let Some(name) = value.get("type").and_then(JsonValue::as_str) {
                frame.extend_from_slice(b"event: ");
                frame.extend_from_slice(name.as_bytes());
                frame.push(b'\n');
            }
        }
        frame.extend_from_slice(b"data: ");
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(b"\n\n");
        self.tx.send(Bytes::from(frame)).await.is_ok()
    }

    async fn send_raw(&mut self, data: &str) -> bool {
        let mut frame = Vec::with_capacity(data.len() + 8);
        frame.extend_from_slice(b"data: ");
        frame.extend_from_slice(data.as_bytes());
        frame.extend_from_slice(b"\n\n");
        self.tx.send(Bytes::from(frame)).await.is_ok()
    }

    fn into_outcome(self, cancelled: bool) -> StreamOutcome {
        StreamOutcome {
            content_len: self.content_chars,
            thinking_len: self.thinking_chars,
            usage: self.state.usage,
            usage_estimated: self.state.usage_estimated,
            ttft: self.ttft,
            detected: self.state.detected,
            finish_reason: self.state.finish_reason.clone(),
            cancelled,
        }
    }
}

/// Passthrough hygiene: strip vendor extensions, install required OpenAI
/// chunk fields, repair broken ids.
fn normalize_passthrough(target: WireFormat, value: &mut JsonValue, state: &StreamState) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    obj.remove("prompt_filter_results");
    if let Some(choices) = obj.get_mut("choices").and_then(JsonValue::as_array_mut) {
        for choice in choices {
            if let Some(choice) = choice.as_object_mut() {
                choice.remove("content_filter_results");
                choice.remove("content_filter_offsets");
            }
        }
    }
    if target == WireFormat::OpenAI {
        obj.entry("object")
            .or_insert_with(|| JsonValue::String("chat.completion.chunk".to_string()));
        obj.entry("created")
            .or_insert_with(|| JsonValue::Number(OffsetDateTime::now_utc().unix_timestamp().into()));
        let id_ok = obj.get("id").and_then(JsonValue::as_str).is_some_and(|s| !s.is_empty());
        if !id_ok {
            obj.insert(
                "id".to_string(),
                JsonValue::String(format!("chatcmpl-{}", state.id)),
            );
        }
    }
}

/// Write resolved usage into a finish chunk that lacks it, with only the
/// fields the client format models.
fn inject_usage(target: WireFormat, value: &mut JsonValue, usage: &UsageTally) {
    let rendered = usage_json(target, usage);
    match target {
        WireFormat::OpenAI => {
            if value.get("usage").map(|u| !u.is_object()).unwrap_or(true) {
                value["usage"] = rendered;
            }
        }
        WireFormat::Claude => {
            if value.get("type").and_then(JsonValue::as_str) == Some("message_delta")
                && value.get("usage").map(|u| !u.is_object()).unwrap_or(true)
            {
                value["usage"] = rendered;
            }
        }
        WireFormat::Gemini | WireFormat::Antigravity => {
            if value.get("usageMetadata").map(|u| !u.is_object()).unwrap_or(true) {
                value["usageMetadata"] = rendered;
            }
        }
        WireFormat::OpenAIResponses => {
            if value.get("type").and_then(JsonValue::as_str) == Some("response.completed") {
                if let Some(response) = value.get_mut("response") {
                    if response.get("usage").map(|u| !u.is_object()).unwrap_or(true) {
                        response["usage"] = rendered;
                    }
                }
            }
        }
        WireFormat::Ollama => {
            if value.get("done").and_then(JsonValue::as_bool) == Some(true)
                && value.get("eval_count").is_none()
            {
                if let (Some(obj), JsonValue::Object(fields)) = (value.as_object_mut(), rendered) {
                    for (k, v) in fields {
                        obj.insert(k, v);
                    }
                }
            }
        }
        WireFormat::Kiro => {}
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NonStreamError {
    #[error("upstream body is not valid JSON: {0}")]
    Decode(String),
}

/// Non-streaming path: absorb the full provider document as one synthetic
/// chunk, aggregate in the client format.
pub fn translate_nonstream(
    config: &EngineConfig,
    body: &[u8],
) -> Result<(JsonValue, StreamOutcome), NonStreamError> {
    let value: JsonValue =
        serde_json::from_slice(body).map_err(|err| NonStreamError::Decode(err.to_string()))?;
    let effective = detect_chunk_format(&value).unwrap_or(config.source);

    let created = OffsetDateTime::now_utc().unix_timestamp();
    let mut state = StreamState::new(
        effective,
        config.target,
        &config.model,
        &config.fallback_id,
        created,
    );
    nonstream::absorb_response(effective, &value, &mut state);

    let content_len = state.content.chars().count();
    let thinking_len = state.thinking.chars().count();
    if state.usage.is_none() {
        state.usage = Some(estimate_usage(config.input_chars, content_len));
        state.usage_estimated = true;
    }

    let out = if effective == config.target {
        value
    } else {
        nonstream::aggregate_response(&state)
    };
    let outcome = StreamOutcome {
        content_len,
        thinking_len,
        usage: state.usage,
        usage_estimated: state.usage_estimated,
        ttft: None,
        detected: (effective != config.source).then_some(effective),
        finish_reason: state.finish_reason.clone(),
        cancelled: false,
    };
    Ok((out, outcome))
}
