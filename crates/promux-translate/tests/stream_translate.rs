use promux_protocol::WireFormat;
use promux_translate::{StreamState, TranslateRegistry, UsageTally};
use serde_json::{json, Value as JsonValue};

fn run(
    src: WireFormat,
    dst: WireFormat,
    chunks: &[JsonValue],
) -> (Vec<JsonValue>, StreamState) {
    let registry = TranslateRegistry::new();
    let f = registry.stream(src, dst).unwrap();
    let mut state = StreamState::new(src, dst, "test-model", "req_1", 1_700_000_000);
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend(f(Some(chunk), &mut state));
    }
    out.extend(f(None, &mut state));
    (out, state)
}

#[test]
fn claude_stream_becomes_openai_chunks() {
    let chunks = vec![
        json!({"type": "message_start", "message": {"id": "msg_abc", "model": "claude-sonnet-4-5", "usage": {"input_tokens": 12}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "lo"}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 2}}),
        json!({"type": "message_stop"}),
    ];
    let (out, state) = run(WireFormat::Claude, WireFormat::OpenAI, &chunks);

    assert!(out.iter().all(|c| c["object"] == "chat.completion.chunk"));
    assert_eq!(out[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(out[0]["id"], "msg_abc");
    let text: String = out
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "Hello");
    let finish = out
        .iter()
        .find(|c| c["choices"][0]["finish_reason"].is_string())
        .unwrap();
    assert_eq!(finish["choices"][0]["finish_reason"], "stop");
    assert_eq!(finish["usage"]["prompt_tokens"], 12);
    assert_eq!(finish["usage"]["completion_tokens"], 2);
    assert_eq!(state.content, "Hello");
}

#[test]
fn claude_tool_stream_becomes_openai_tool_deltas() {
    let chunks = vec![
        json!({"type": "message_start", "message": {"id": "msg_t", "model": "m"}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"city\":"}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "\"Oslo\"}"}}),
        json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 9}}),
    ];
    let (out, state) = run(WireFormat::Claude, WireFormat::OpenAI, &chunks);

    let start = out
        .iter()
        .find(|c| c["choices"][0]["delta"]["tool_calls"][0]["id"] == "toolu_1")
        .unwrap();
    assert_eq!(
        start["choices"][0]["delta"]["tool_calls"][0]["function"]["name"],
        "get_weather"
    );
    let args: String = out
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"].as_str())
        .collect();
    assert_eq!(args, "{\"city\":\"Oslo\"}");
    let finish = out
        .iter()
        .find(|c| c["choices"][0]["finish_reason"].is_string())
        .unwrap();
    assert_eq!(finish["choices"][0]["finish_reason"], "tool_calls");
    assert_eq!(state.tool_calls.values().next().unwrap().arguments, "{\"city\":\"Oslo\"}");
}

#[test]
fn openai_stream_becomes_claude_events_in_order() {
    let chunks = vec![
        json!({"id": "chatcmpl-1", "model": "gpt-4o", "choices": [{"index": 0, "delta": {"role": "assistant"}}]}),
        json!({"id": "chatcmpl-1", "choices": [{"index": 0, "delta": {"content": "Hi"}}]}),
        json!({"id": "chatcmpl-1", "choices": [{"index": 0, "delta": {"content": " there"}}]}),
        json!({"id": "chatcmpl-1", "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
        json!({"id": "chatcmpl-1", "choices": [], "usage": {"prompt_tokens": 5, "completion_tokens": 2}}),
    ];
    let (out, _) = run(WireFormat::OpenAI, WireFormat::Claude, &chunks);

    let kinds: Vec<&str> = out.iter().filter_map(|c| c["type"].as_str()).collect();
    assert_eq!(
        kinds,
        [
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop"
        ]
    );
    let message_delta = out.iter().find(|c| c["type"] == "message_delta").unwrap();
    assert_eq!(message_delta["delta"]["stop_reason"], "end_turn");
    // Usage arrived after the finish chunk yet still lands in message_delta.
    assert_eq!(message_delta["usage"]["output_tokens"], 2);
    assert!(message_delta["usage"].get("total_tokens").is_none());
}

#[test]
fn gemini_stream_becomes_openai_chunks() {
    let chunks = vec![
        json!({"candidates": [{"content": {"parts": [{"text": "thinking...", "thought": true}]}}]}),
        json!({"candidates": [{"content": {"parts": [{"text": "Answer"}]}}]}),
        json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3, "totalTokenCount": 10}
        }),
    ];
    let (out, state) = run(WireFormat::Gemini, WireFormat::OpenAI, &chunks);

    let reasoning: String = out
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["reasoning_content"].as_str())
        .collect();
    assert_eq!(reasoning, "thinking...");
    let text: String = out
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "Answer");
    let finish = out
        .iter()
        .find(|c| c["choices"][0]["finish_reason"].is_string())
        .unwrap();
    assert_eq!(finish["usage"]["prompt_tokens"], 7);
    assert_eq!(state.thinking, "thinking...");
}

#[test]
fn responses_stream_becomes_openai_chunks() {
    let chunks = vec![
        json!({"type": "response.created", "response": {"id": "resp_1", "model": "gpt-5", "status": "in_progress", "output": []}}),
        json!({"type": "response.output_text.delta", "delta": "Hel"}),
        json!({"type": "response.output_text.delta", "delta": "lo"}),
        json!({"type": "response.completed", "response": {"id": "resp_1", "model": "gpt-5", "status": "completed", "output": [], "usage": {"input_tokens": 4, "output_tokens": 2, "total_tokens": 6}}}),
    ];
    let (out, _) = run(WireFormat::OpenAIResponses, WireFormat::OpenAI, &chunks);

    assert_eq!(out[0]["choices"][0]["delta"]["role"], "assistant");
    let text: String = out
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "Hello");
    let finish = out
        .iter()
        .find(|c| c["choices"][0]["finish_reason"].is_string())
        .unwrap();
    assert_eq!(finish["usage"]["completion_tokens"], 2);
}

#[test]
fn openai_stream_becomes_ollama_chunks() {
    let chunks = vec![
        json!({"id": "c", "choices": [{"index": 0, "delta": {"content": "ok"}}]}),
        json!({"id": "c", "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}], "usage": {"prompt_tokens": 3, "completion_tokens": 1}}),
    ];
    let (out, _) = run(WireFormat::OpenAI, WireFormat::Ollama, &chunks);
    assert_eq!(out[0]["message"]["content"], "ok");
    assert_eq!(out[0]["done"], false);
    let last = out.last().unwrap();
    assert_eq!(last["done"], true);
    assert_eq!(last["prompt_eval_count"], 3);
    assert_eq!(last["eval_count"], 1);
}

#[test]
fn flush_emits_finish_when_upstream_never_did() {
    let chunks = vec![json!({"id": "c", "choices": [{"index": 0, "delta": {"content": "partial"}}]})];
    let (out, state) = run(WireFormat::OpenAI, WireFormat::Claude, &chunks);
    let kinds: Vec<&str> = out.iter().filter_map(|c| c["type"].as_str()).collect();
    assert!(kinds.contains(&"message_delta"));
    assert!(kinds.contains(&"message_stop"));
    assert!(state.finish_sent);
}

#[test]
fn state_accumulates_usage_for_estimation_path() {
    let chunks = vec![
        json!({"id": "c", "choices": [{"index": 0, "delta": {"content": "no usage here"}}]}),
        json!({"id": "c", "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
    ];
    let (_, mut state) = run(WireFormat::OpenAI, WireFormat::Claude, &chunks);
    assert!(state.usage.is_none());
    state.merge_usage(UsageTally::new(10, 20));
    assert_eq!(state.usage.unwrap().total(), 30);
}
