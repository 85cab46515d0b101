use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use promux_common::{ApiKey, MachineData, ProviderConnection};
use promux_core::{format_key, ChatCall, Pipeline, PipelineBody};
use promux_pool::CredentialPool;
use promux_protocol::WireFormat;
use promux_providers::{
    UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamRequest, UpstreamResponse,
};
use promux_storage::{MachineStore, ObservabilitySink};
use promux_translate::TranslateRegistry;
use serde_json::json;

const SECRET: &str = "test-secret";

/// Scripted upstream: pops one canned response per call and records the
/// request that triggered it.
struct ScriptedClient {
    script: Mutex<Vec<CannedResponse>>,
    seen: Mutex<Vec<UpstreamRequest>>,
}

enum CannedResponse {
    Status(u16, &'static str),
    Sse(Vec<&'static str>),
}

impl ScriptedClient {
    fn new(script: Vec<CannedResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl UpstreamClient for ScriptedClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>> {
        Box::pin(async move {
            self.seen.lock().unwrap().push(req);
            let canned = self.script.lock().unwrap().remove(0);
            match canned {
                CannedResponse::Status(status, body) => Ok(UpstreamResponse {
                    status,
                    headers: Vec::new(),
                    body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                CannedResponse::Sse(frames) => {
                    let (tx, rx) = tokio::sync::mpsc::channel(16);
                    tokio::spawn(async move {
                        for frame in frames {
                            if tx.send(Bytes::from_static(frame.as_bytes())).await.is_err() {
                                break;
                            }
                        }
                    });
                    Ok(UpstreamResponse {
                        status: 200,
                        headers: vec![(
                            "content-type".to_string(),
                            "text/event-stream".to_string(),
                        )],
                        body: UpstreamBody::Stream(rx),
                    })
                }
            }
        })
    }
}

fn connection(priority: i32) -> ProviderConnection {
    ProviderConnection {
        provider: "openai".to_string(),
        is_active: true,
        priority,
        api_key: Some(format!("sk-upstream-{priority}")),
        access_token: None,
        refresh_token: None,
        expires_at: None,
        project_id: None,
        provider_specific_data: Default::default(),
        health: Default::default(),
        usage: Default::default(),
    }
}

async fn seed_machine(store: &MachineStore) -> String {
    let mut data = MachineData::default();
    data.api_keys.push(ApiKey {
        id: "k1".to_string(),
        key: format_key(SECRET, "m1", "k1"),
        name: "default".to_string(),
        is_active: true,
        created_at: None,
    });
    data.providers.insert("conn-a".to_string(), connection(1));
    data.providers.insert("conn-b".to_string(), connection(2));
    store.save("m1", &data).await.unwrap();
    format_key(SECRET, "m1", "k1")
}

async fn build_pipeline(client: Arc<ScriptedClient>) -> (Pipeline, MachineStore, String) {
    let db = promux_storage::connect("sqlite::memory:").await.unwrap();
    promux_storage::init_machine_schema(&db).await.unwrap();
    let store = MachineStore::new(db);
    let key = seed_machine(&store).await;
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(CredentialPool::new()),
        client,
        Arc::new(TranslateRegistry::new()),
        ObservabilitySink::disabled(),
        SECRET.to_string(),
    );
    (pipeline, store, key)
}

fn chat_call(key: &str, stream: bool) -> ChatCall {
    ChatCall {
        trace_id: "trace-1".to_string(),
        machine_hint: None,
        presented_key: Some(key.to_string()),
        source: WireFormat::OpenAI,
        body: json!({
            "model": "openai/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": stream,
        }),
        path_model: None,
        stream_hint: None,
    }
}

async fn collect_stream(body: PipelineBody) -> String {
    match body {
        PipelineBody::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        PipelineBody::Stream(mut rx) => {
            let mut out = String::new();
            while let Some(chunk) = rx.recv().await {
                out.push_str(std::str::from_utf8(&chunk).unwrap());
            }
            out
        }
    }
}

#[tokio::test]
async fn retryable_failure_hops_to_next_credential() {
    let client = ScriptedClient::new(vec![
        // conn-a (priority 1) is rate limited, then the pipeline retries the
        // same URL once with no hint, then conn-b succeeds.
        CannedResponse::Status(429, "{\"error\":{\"message\":\"rate limit\"}}"),
        CannedResponse::Status(429, "{\"error\":{\"message\":\"rate limit\"}}"),
        CannedResponse::Sse(vec![
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"pong\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ]),
    ]);
    let (pipeline, store, key) = build_pipeline(client.clone()).await;

    let resp = pipeline.handle_chat(chat_call(&key, true)).await;
    assert_eq!(resp.status, 200);
    let out = collect_stream(resp.body).await;
    assert!(out.contains("pong"));
    assert!(out.ends_with("data: [DONE]\n\n"));

    // Three upstream calls: two against conn-a, one against conn-b.
    assert_eq!(client.seen.lock().unwrap().len(), 3);

    // conn-a carries the failure triple; conn-b stays clean.
    let data = store.load("m1").await.unwrap().unwrap();
    let a = &data.providers["conn-a"];
    assert_eq!(a.health.error_code, Some(429));
    assert_eq!(a.health.backoff_level, 1);
    assert!(a.health.rate_limited_until.is_some());
    let b = &data.providers["conn-b"];
    assert!(b.health.last_error.is_none());
    assert_eq!(b.usage.consecutive_use_count, 1);
}

#[tokio::test]
async fn non_retryable_error_passes_through() {
    let client = ScriptedClient::new(vec![CannedResponse::Status(
        422,
        "{\"error\":{\"message\":\"bad schema\"}}",
    )]);
    let (pipeline, _, key) = build_pipeline(client.clone()).await;

    let resp = pipeline.handle_chat(chat_call(&key, false)).await;
    assert_eq!(resp.status, 422);
    let out = collect_stream(resp.body).await;
    assert!(out.contains("bad schema"));
    assert_eq!(client.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn all_rate_limited_surfaces_503_with_retry_after() {
    let client = ScriptedClient::new(Vec::new());
    let (pipeline, store, key) = build_pipeline(client).await;

    // Both connections already cooling down.
    let mut data = store.load("m1").await.unwrap().unwrap();
    let until = time::OffsetDateTime::now_utc() + std::time::Duration::from_secs(90);
    for conn in data.providers.values_mut() {
        conn.health.rate_limited_until = Some(until);
        conn.health.last_error = Some("quota".to_string());
        conn.health.error_code = Some(429);
    }
    store.save("m1", &data).await.unwrap();

    let resp = pipeline.handle_chat(chat_call(&key, false)).await;
    assert_eq!(resp.status, 503);
    let retry_after: u64 = resp
        .headers
        .iter()
        .find(|(k, _)| k == "retry-after")
        .map(|(_, v)| v.parse().unwrap())
        .expect("retry-after present");
    assert!((1..=91).contains(&retry_after));
    let out = collect_stream(resp.body).await;
    assert!(out.contains("rate-limited"));
    assert!(out.contains("quota"));
}

#[tokio::test]
async fn unknown_key_is_rejected() {
    let client = ScriptedClient::new(Vec::new());
    let (pipeline, _, _) = build_pipeline(client).await;

    // Well-formed checksum for a key the machine does not know.
    let stranger = format_key(SECRET, "m1", "k999");
    let resp = pipeline.handle_chat(chat_call(&stranger, false)).await;
    assert_eq!(resp.status, 401);

    // Tampered checksum: not even a machine lookup.
    let resp = pipeline
        .handle_chat(chat_call("sk-m1-k1-00000000", false))
        .await;
    assert_eq!(resp.status, 401);
}

#[tokio::test]
async fn claude_client_against_openai_provider_translates_both_ways() {
    let client = ScriptedClient::new(vec![CannedResponse::Sse(vec![
        "data: {\"id\":\"c1\",\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hello\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":1}}\n\n",
        "data: [DONE]\n\n",
    ])]);
    let (pipeline, _, key) = build_pipeline(client.clone()).await;

    let call = ChatCall {
        trace_id: "trace-2".to_string(),
        machine_hint: None,
        presented_key: Some(key),
        source: WireFormat::Claude,
        body: json!({
            "model": "openai/gpt-4o",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "say hello"}],
            "stream": true,
        }),
        path_model: None,
        stream_hint: None,
    };
    let resp = pipeline.handle_chat(call).await;
    assert_eq!(resp.status, 200);
    let out = collect_stream(resp.body).await;
    assert!(out.contains("event: message_start"));
    assert!(out.contains("\"text\":\"hello\""));
    assert!(out.contains("event: message_stop"));
    assert!(out.ends_with("data: [DONE]\n\n"));

    // The upstream body was translated into the OpenAI dialect.
    let seen = client.seen.lock().unwrap();
    let sent: serde_json::Value = serde_json::from_slice(seen[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(sent["model"], "gpt-4o");
    assert_eq!(sent["messages"][0]["role"], "user");
    assert_eq!(sent["stream"], true);
}
