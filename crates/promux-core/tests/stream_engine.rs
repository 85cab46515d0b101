use std::sync::{Arc, Mutex};

use bytes::Bytes;
use promux_core::engine::{spawn_stream, translate_nonstream, EngineConfig, StreamOutcome};
use promux_protocol::WireFormat;
use promux_translate::TranslateRegistry;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

fn config(source: WireFormat, target: WireFormat, input_chars: usize) -> EngineConfig {
    EngineConfig {
        source,
        target,
        model: "test-model".to_string(),
        fallback_id: "trace-1".to_string(),
        input_chars,
    }
}

async fn run_engine(
    config: EngineConfig,
    frames: Vec<&str>,
) -> (String, StreamOutcome) {
    let registry = Arc::new(TranslateRegistry::new());
    let (tx, rx) = mpsc::channel::<Bytes>(16);
    let outcome_slot: Arc<Mutex<Option<StreamOutcome>>> = Arc::new(Mutex::new(None));
    let slot = outcome_slot.clone();
    let mut client_rx = spawn_stream(
        registry,
        config,
        rx,
        Box::new(move |outcome| {
            *slot.lock().unwrap() = Some(outcome);
        }),
    );

    for frame in frames {
        tx.send(Bytes::from(frame.to_string())).await.unwrap();
    }
    drop(tx);

    let mut out = String::new();
    while let Some(chunk) = client_rx.recv().await {
        out.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    let outcome = outcome_slot.lock().unwrap().take().expect("callback ran");
    (out, outcome)
}

fn data_lines(out: &str) -> Vec<JsonValue> {
    out.lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .filter(|l| *l != "[DONE]")
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn passthrough_always_terminates_with_done() {
    let (out, _) = run_engine(
        config(WireFormat::OpenAI, WireFormat::OpenAI, 10),
        vec!["data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n"],
    )
    .await;
    assert_eq!(out.matches("data: [DONE]").count(), 1);
    assert!(out.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn upstream_done_is_not_duplicated() {
    let (out, _) = run_engine(
        config(WireFormat::OpenAI, WireFormat::OpenAI, 10),
        vec![
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ],
    )
    .await;
    assert_eq!(out.matches("data: [DONE]").count(), 1);
}

#[tokio::test]
async fn passthrough_normalises_and_filters() {
    let (out, _) = run_engine(
        config(WireFormat::OpenAI, WireFormat::OpenAI, 10),
        vec![
            // Empty delta with vendor noise: dropped entirely.
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"content_filter_results\":{}}],\"prompt_filter_results\":[]}\n\n",
            // Unpadded data prefix, missing object/created/id: repaired.
            "data:{\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"}}]}\n\n",
        ],
    )
    .await;
    let chunks = data_lines(&out);
    assert_eq!(chunks.len(), 1);
    let chunk = &chunks[0];
    assert_eq!(chunk["object"], "chat.completion.chunk");
    assert!(chunk["created"].is_i64() || chunk["created"].is_u64());
    assert_eq!(chunk["id"], "chatcmpl-trace-1");
    assert!(chunk.get("prompt_filter_results").is_none());
}

#[tokio::test]
async fn misadvertised_claude_stream_is_detected_and_translated() {
    // Configured as OpenAI-compatible, actually speaks Anthropic.
    let frames = vec![
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"m\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
        "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"input_tokens\":3,\"output_tokens\":1}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ];
    let (out, outcome) = run_engine(config(WireFormat::OpenAI, WireFormat::OpenAI, 10), frames).await;

    assert_eq!(outcome.detected, Some(WireFormat::Claude));
    let chunks = data_lines(&out);
    assert!(chunks.iter().all(|c| c["object"] == "chat.completion.chunk"));
    let text: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "Hello");
    assert!(out.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn missing_usage_is_estimated_from_char_counts() {
    // 400 chars of content, 1200 chars of input.
    let content = "x".repeat(400);
    let first = format!(
        "data: {{\"id\":\"c\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{content}\"}}}}]}}\n\n"
    );
    let finish =
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n";
    let (out, outcome) = run_engine(
        config(WireFormat::OpenAI, WireFormat::OpenAI, 1200),
        vec![first.as_str(), finish],
    )
    .await;

    assert!(outcome.usage_estimated);
    let usage = outcome.usage.unwrap();
    let input = usage.input_tokens.unwrap();
    let output = usage.output_tokens.unwrap();
    assert!((300..=320).contains(&input), "input {input}");
    assert!((100..=120).contains(&output), "output {output}");

    // The rewritten finish chunk carries OpenAI-shaped usage.
    let chunks = data_lines(&out);
    let finish_chunk = chunks
        .iter()
        .find(|c| c["choices"][0]["finish_reason"].is_string())
        .unwrap();
    assert_eq!(finish_chunk["usage"]["prompt_tokens"], input);
    assert_eq!(finish_chunk["usage"]["completion_tokens"], output);
    assert_eq!(
        finish_chunk["usage"]["total_tokens"],
        input + output
    );
}

#[tokio::test]
async fn reported_usage_wins_over_estimation() {
    let frames = vec![
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n",
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":42,\"completion_tokens\":7,\"total_tokens\":49}}\n\n",
    ];
    let (_, outcome) = run_engine(config(WireFormat::OpenAI, WireFormat::OpenAI, 9999), frames).await;
    assert!(!outcome.usage_estimated);
    assert_eq!(outcome.usage.unwrap().input_tokens, Some(42));
}

#[tokio::test]
async fn split_frames_across_chunks_are_reassembled() {
    let (out, _) = run_engine(
        config(WireFormat::OpenAI, WireFormat::OpenAI, 10),
        vec![
            "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"del",
            "ta\":{\"content\":\"half\"}}]}\n\n",
        ],
    )
    .await;
    let chunks = data_lines(&out);
    assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "half");
}

#[tokio::test]
async fn claude_client_gets_named_events() {
    let frames = vec![
        "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    ];
    let (out, _) = run_engine(config(WireFormat::OpenAI, WireFormat::Claude, 10), frames).await;
    assert!(out.contains("event: message_start\n"));
    assert!(out.contains("event: content_block_delta\n"));
    assert!(out.contains("event: message_stop\n"));
    assert!(out.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn cancellation_still_reports_partial_accounting() {
    let registry = Arc::new(TranslateRegistry::new());
    let (tx, rx) = mpsc::channel::<Bytes>(16);
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let done_tx = Mutex::new(Some(done_tx));
    let client_rx = spawn_stream(
        registry,
        config(WireFormat::OpenAI, WireFormat::OpenAI, 10),
        rx,
        Box::new(move |outcome| {
            if let Some(done_tx) = done_tx.lock().unwrap().take() {
                let _ = done_tx.send(outcome);
            }
        }),
    );

    tx.send(Bytes::from(
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial\"}}]}\n\n",
    ))
    .await
    .unwrap();
    // Give the engine a moment to forward, then hang up the client side.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    drop(client_rx);
    tx.send(Bytes::from(
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"more\"}}]}\n\n",
    ))
    .await
    .ok();
    tx.send(Bytes::from(
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"more\"}}]}\n\n",
    ))
    .await
    .ok();
    drop(tx);

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), done_rx)
        .await
        .expect("callback fired")
        .unwrap();
    assert!(outcome.cancelled);
    assert!(outcome.content_len >= "partial".len());
}

#[tokio::test]
async fn nonstream_claude_body_aggregates_to_openai() {
    let body = serde_json::json!({
        "id": "msg_n1",
        "type": "message",
        "role": "assistant",
        "model": "claude-sonnet-4-5",
        "content": [{"type": "text", "text": "The answer is 4."}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 11, "output_tokens": 6}
    });
    let cfg = config(WireFormat::Claude, WireFormat::OpenAI, 50);
    let (value, outcome) =
        translate_nonstream(&cfg, &serde_json::to_vec(&body).unwrap()).unwrap();

    assert_eq!(value["object"], "chat.completion");
    assert_eq!(value["choices"][0]["message"]["content"], "The answer is 4.");
    assert_eq!(value["choices"][0]["finish_reason"], "stop");
    assert_eq!(value["usage"]["prompt_tokens"], 11);
    assert!(!outcome.usage_estimated);
    assert_eq!(outcome.content_len, "The answer is 4.".len());
}
