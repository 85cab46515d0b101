use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_stream::wrappers::ReceiverStream;

use promux_core::{error_body, ChatCall, Pipeline, PipelineBody, PipelineResponse};
use promux_protocol::WireFormat;
use promux_providers::{HttpMethod, UpstreamClient, UpstreamRequest};

#[derive(Clone)]
pub struct RouterState {
    pub pipeline: Arc<Pipeline>,
    pub client: Arc<dyn UpstreamClient>,
}

#[derive(Clone)]
struct RequestTraceId(String);

#[derive(Clone)]
struct MachinePrefix(Option<String>);

#[derive(Clone)]
struct ClientKey(Option<String>);

/// First path segments that are real routes; anything else in first position
/// is treated as a machine id (the legacy prefixed form).
const ROUTE_HEADS: [&str; 6] = ["v1", "v1beta", "api", "health", "forward", "forward-raw"];

pub fn proxy_router(state: RouterState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/messages", post(claude_messages))
        .route("/v1/responses", post(openai_responses))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/api/chat", post(ollama_chat))
        .route("/api/chat", post(ollama_chat))
        .route("/v1/models", get(models_list))
        .route("/v1beta/models", get(gemini_models_list))
        .route("/v1beta/models/{*model_action}", post(gemini_post))
        .route("/api/tags", get(ollama_tags))
        .route("/v1/verify", get(verify))
        .route("/health", get(health))
        .route("/forward", post(forward))
        .route("/forward-raw", post(forward_raw))
        .layer(middleware::from_fn(prepare_request))
        .with_state(state)
}

/// One middleware covers the request-side plumbing: CORS preflight, trace
/// id, machine-prefix rewrite, key extraction and auth-header stripping.
async fn prepare_request(mut req: axum::http::Request<Body>, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return cors_preflight();
    }

    let trace_id = uuid::Uuid::now_v7().to_string();
    req.extensions_mut().insert(RequestTraceId(trace_id));

    let (machine, rewritten) = split_machine_prefix(req.uri());
    if let Some(uri) = rewritten {
        *req.uri_mut() = uri;
    }
    req.extensions_mut().insert(MachinePrefix(machine));

    let key = extract_client_key(req.headers(), req.uri().query());
    // Never forward downstream auth material toward providers or logs.
    req.headers_mut().remove(header::AUTHORIZATION);
    req.headers_mut().remove("x-api-key");
    req.headers_mut().remove("x-goog-api-key");
    req.extensions_mut().insert(ClientKey(key));

    let mut resp = next.run(req).await;
    resp.headers_mut().insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    resp
}

fn cors_preflight() -> Response {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("access-control-allow-origin", "*")
        .header(
            "access-control-allow-methods",
            "GET, POST, PUT, DELETE, OPTIONS",
        )
        .header(
            "access-control-allow-headers",
            "authorization, content-type, x-api-key, x-goog-api-key, anthropic-version",
        )
        .header("access-control-max-age", "86400")
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::NO_CONTENT.into_response())
}

fn split_machine_prefix(uri: &Uri) -> (Option<String>, Option<Uri>) {
    let path = uri.path();
    let mut segments = path.trim_start_matches('/').splitn(2, '/');
    let first = segments.next().unwrap_or_default();
    if first.is_empty() || ROUTE_HEADS.contains(&first) {
        return (None, None);
    }
    let rest = segments.next().unwrap_or_default();
    let new_path = format!("/{rest}");
    let new_uri = match uri.query() {
        Some(q) => format!("{new_path}?{q}").parse().ok(),
        None => new_path.parse().ok(),
    };
    (Some(first.to_string()), new_uri)
}

fn extract_client_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if value.len() > 7 && value[..7].eq_ignore_ascii_case("bearer ") {
            let token = value[7..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    for name in ["x-api-key", "x-goog-api-key"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    let query = query?;
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .ok()?
        .into_iter()
        .find(|(k, _)| k == "key")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_json_body(body: &Bytes) -> Result<JsonValue, Response> {
    serde_json::from_slice(body).map_err(|err| {
        to_response(PipelineResponse::json(
            400,
            error_body(&format!("malformed JSON body: {err}"), Some("invalid_request_error")),
        ))
    })
}

fn to_response(resp: PipelineResponse) -> Response {
    let mut builder = Response::builder().status(resp.status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &resp.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
    }
    let is_sse = resp
        .headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("content-type") && v.contains("text/event-stream"));
    let body = match resp.body {
        PipelineBody::Bytes(bytes) => Body::from(bytes),
        PipelineBody::Stream(rx) => {
            let rx = if is_sse { with_heartbeat(rx) } else { rx };
            Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
        }
    };
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

const SSE_HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);
const SSE_HEARTBEAT_FRAME: &[u8] = b": keep-alive\n\n";

/// Interleave comment frames during upstream silence so intermediaries do
/// not drop idle connections.
fn with_heartbeat(
    mut upstream: tokio::sync::mpsc::Receiver<Bytes>,
) -> tokio::sync::mpsc::Receiver<Bytes> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SSE_HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // skip the immediate tick

        loop {
            tokio::select! {
                maybe_chunk = upstream.recv() => {
                    let Some(chunk) = maybe_chunk else {
                        break;
                    };
                    ticker.reset();
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if tx.send(Bytes::from_static(SSE_HEARTBEAT_FRAME)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("upgrade")
}

// ---- Chat endpoints ----

async fn dispatch_chat(
    state: RouterState,
    trace_id: String,
    machine: Option<String>,
    key: Option<String>,
    source: WireFormat,
    body: Bytes,
    path_model: Option<String>,
    stream_hint: Option<bool>,
) -> Response {
    let body = match parse_json_body(&body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let call = ChatCall {
        trace_id,
        machine_hint: machine,
        presented_key: key,
        source,
        body,
        path_model,
        stream_hint,
    };
    to_response(state.pipeline.handle_chat(call).await)
}

async fn openai_chat(
    State(state): State<RouterState>,
    Extension(trace): Extension<RequestTraceId>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
    body: Bytes,
) -> Response {
    dispatch_chat(state, trace.0, machine.0, key.0, WireFormat::OpenAI, body, None, None).await
}

async fn claude_messages(
    State(state): State<RouterState>,
    Extension(trace): Extension<RequestTraceId>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
    body: Bytes,
) -> Response {
    dispatch_chat(state, trace.0, machine.0, key.0, WireFormat::Claude, body, None, None).await
}

async fn openai_responses(
    State(state): State<RouterState>,
    Extension(trace): Extension<RequestTraceId>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
    body: Bytes,
) -> Response {
    dispatch_chat(
        state,
        trace.0,
        machine.0,
        key.0,
        WireFormat::OpenAIResponses,
        body,
        None,
        None,
    )
    .await
}

async fn ollama_chat(
    State(state): State<RouterState>,
    Extension(trace): Extension<RequestTraceId>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
    body: Bytes,
) -> Response {
    dispatch_chat(state, trace.0, machine.0, key.0, WireFormat::Ollama, body, None, None).await
}

async fn gemini_post(
    State(state): State<RouterState>,
    Extension(trace): Extension<RequestTraceId>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
    Path(model_action): Path<String>,
    body: Bytes,
) -> Response {
    let model_action = model_action.trim_start_matches('/');
    let Some((model, action)) = model_action.rsplit_once(':') else {
        return to_response(PipelineResponse::error(
            400,
            "expected models/{model}:{action}",
            Some("invalid_request_error"),
        ));
    };
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            return to_response(PipelineResponse::error(
                404,
                &format!("unknown action: {action}"),
                None,
            ));
        }
    };
    dispatch_chat(
        state,
        trace.0,
        machine.0,
        key.0,
        WireFormat::Gemini,
        body,
        Some(model.to_string()),
        Some(stream),
    )
    .await
}

// ---- Listings / misc ----

async fn models_list(
    State(state): State<RouterState>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
) -> Response {
    let ids = match state
        .pipeline
        .list_model_ids(machine.0.as_deref(), key.0.as_deref())
        .await
    {
        Ok(ids) => ids,
        Err(resp) => return to_response(resp),
    };
    let created = OffsetDateTime::now_utc().unix_timestamp();
    let data: Vec<JsonValue> = ids
        .iter()
        .map(|id| json!({"id": id, "object": "model", "created": created, "owned_by": "promux"}))
        .collect();
    axum::Json(json!({"object": "list", "data": data})).into_response()
}

async fn gemini_models_list(
    State(state): State<RouterState>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
) -> Response {
    let ids = match state
        .pipeline
        .list_model_ids(machine.0.as_deref(), key.0.as_deref())
        .await
    {
        Ok(ids) => ids,
        Err(resp) => return to_response(resp),
    };
    let models: Vec<JsonValue> = ids
        .iter()
        .map(|id| {
            json!({
                "name": format!("models/{id}"),
                "displayName": id,
                "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
            })
        })
        .collect();
    axum::Json(json!({"models": models})).into_response()
}

async fn ollama_tags(
    State(state): State<RouterState>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
) -> Response {
    let ids = match state
        .pipeline
        .list_model_ids(machine.0.as_deref(), key.0.as_deref())
        .await
    {
        Ok(ids) => ids,
        Err(resp) => return to_response(resp),
    };
    let modified = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let models: Vec<JsonValue> = ids
        .iter()
        .map(|id| json!({"name": id, "model": id, "modified_at": modified, "size": 0}))
        .collect();
    axum::Json(json!({"models": models})).into_response()
}

async fn verify(
    State(state): State<RouterState>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
) -> Response {
    to_response(
        state
            .pipeline
            .verify_key(machine.0.as_deref(), key.0.as_deref())
            .await,
    )
}

async fn health() -> Response {
    axum::Json(json!({"status": "ok"})).into_response()
}

async fn embeddings(
    State(state): State<RouterState>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
    body: Bytes,
) -> Response {
    let body = match parse_json_body(&body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    to_response(
        state
            .pipeline
            .embeddings(machine.0.as_deref(), key.0.as_deref(), body)
            .await,
    )
}

// ---- Operator passthrough ----

#[derive(Debug, serde::Deserialize)]
struct ForwardEnvelope {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    body: Option<JsonValue>,
}

async fn forward(
    State(state): State<RouterState>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
    body: Bytes,
) -> Response {
    if let Err(resp) = state
        .pipeline
        .authenticate(machine.0.as_deref(), key.0.as_deref())
        .await
    {
        return to_response(resp);
    }
    let envelope: ForwardEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            return to_response(PipelineResponse::error(
                400,
                &format!("malformed forward envelope: {err}"),
                Some("invalid_request_error"),
            ));
        }
    };
    let method = envelope
        .method
        .as_deref()
        .and_then(HttpMethod::parse)
        .unwrap_or(HttpMethod::Post);
    let payload = envelope
        .body
        .map(|b| Bytes::from(serde_json::to_vec(&b).unwrap_or_default()));
    let headers = envelope.headers.into_iter().collect();
    send_forward(state, method, envelope.url, headers, payload).await
}

async fn forward_raw(
    State(state): State<RouterState>,
    Extension(machine): Extension<MachinePrefix>,
    Extension(key): Extension<ClientKey>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = state
        .pipeline
        .authenticate(machine.0.as_deref(), key.0.as_deref())
        .await
    {
        return to_response(resp);
    }
    let Some(url) = headers
        .get("x-forward-url")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return to_response(PipelineResponse::error(
            400,
            "x-forward-url header required",
            Some("invalid_request_error"),
        ));
    };
    let method = headers
        .get("x-forward-method")
        .and_then(|v| v.to_str().ok())
        .and_then(HttpMethod::parse)
        .unwrap_or(HttpMethod::Post);
    let forwarded: Vec<(String, String)> = headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            name == "content-type" || name == "accept" || name.starts_with("x-forwarded-")
        })
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let payload = (!body.is_empty()).then_some(body);
    send_forward(state, method, url, forwarded, payload).await
}

async fn send_forward(
    state: RouterState,
    method: HttpMethod,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
) -> Response {
    let req = UpstreamRequest {
        method,
        url,
        headers,
        body,
        stream: false,
    };
    match state.client.send(req).await {
        Ok(resp) => to_response(PipelineResponse {
            status: resp.status,
            headers: resp.headers,
            body: match resp.body {
                promux_providers::UpstreamBody::Bytes(bytes) => PipelineBody::Bytes(bytes),
                promux_providers::UpstreamBody::Stream(rx) => PipelineBody::Stream(rx),
            },
        }),
        Err(err) => to_response(PipelineResponse::error(502, &err.to_string(), Some("api_error"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_prefix_is_split_from_unknown_heads() {
        let uri: Uri = "/m1abc/v1/chat/completions".parse().unwrap();
        let (machine, rewritten) = split_machine_prefix(&uri);
        assert_eq!(machine.as_deref(), Some("m1abc"));
        assert_eq!(rewritten.unwrap().path(), "/v1/chat/completions");

        let uri: Uri = "/v1/chat/completions".parse().unwrap();
        let (machine, rewritten) = split_machine_prefix(&uri);
        assert!(machine.is_none());
        assert!(rewritten.is_none());
    }

    #[test]
    fn query_survives_prefix_rewrite() {
        let uri: Uri = "/m1/v1beta/models?key=abc".parse().unwrap();
        let (machine, rewritten) = split_machine_prefix(&uri);
        assert_eq!(machine.as_deref(), Some("m1"));
        let rewritten = rewritten.unwrap();
        assert_eq!(rewritten.path(), "/v1beta/models");
        assert_eq!(rewritten.query(), Some("key=abc"));
    }

    #[test]
    fn key_extraction_order() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer tok-1".parse().unwrap());
        headers.insert("x-api-key", "tok-2".parse().unwrap());
        assert_eq!(extract_client_key(&headers, None).as_deref(), Some("tok-1"));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "tok-2".parse().unwrap());
        assert_eq!(extract_client_key(&headers, None).as_deref(), Some("tok-2"));

        let headers = HeaderMap::new();
        assert_eq!(
            extract_client_key(&headers, Some("key=tok-3")).as_deref(),
            Some("tok-3")
        );
        assert_eq!(extract_client_key(&headers, None), None);
    }
}
