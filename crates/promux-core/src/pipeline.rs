//! End-to-end request pipeline: authenticate, resolve, select, refresh,
//! dispatch, classify, stream, finalise. In-request fallback hops to the
//! next credential on retryable upstream failures.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use promux_common::{MachineData, ProviderConnection};
use promux_pool::{CredentialPool, FailureDecision, SelectOutcome};
use promux_providers::{
    catalogue, execute, needs_refresh, parse_retry_hint, refresh, ExecutePlan, ProviderSpec,
    UpstreamBody, UpstreamClient, UpstreamResponse,
};
use promux_protocol::WireFormat;
use promux_storage::{MachineStore, ObservabilitySink, RequestDetailRecord, UsageRecord};
use promux_translate::{RequestCtx, TranslateRegistry};

use crate::engine::{self, EngineConfig, StreamOutcome, DONE_FRAME};
use crate::error::{PipelineBody, PipelineResponse};
use crate::keys::{parse_key, ParsedKey};
use crate::resolve::{resolve_model, ProviderModel, ResolvedModel};

pub struct Pipeline {
    store: MachineStore,
    pool: Arc<CredentialPool>,
    client: Arc<dyn UpstreamClient>,
    registry: Arc<TranslateRegistry>,
    obs: ObservabilitySink,
    key_secret: String,
}

/// One inbound chat/completion request, already routed to a source format.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub trace_id: String,
    /// Machine id from the path prefix, when the prefixed form was used.
    pub machine_hint: Option<String>,
    pub presented_key: Option<String>,
    pub source: WireFormat,
    pub body: JsonValue,
    /// Gemini carries the model in the URL, not the body.
    pub path_model: Option<String>,
    /// Gemini `:streamGenerateContent` forces streaming regardless of body.
    pub stream_hint: Option<bool>,
}

impl Pipeline {
    pub fn new(
        store: MachineStore,
        pool: Arc<CredentialPool>,
        client: Arc<dyn UpstreamClient>,
        registry: Arc<TranslateRegistry>,
        obs: ObservabilitySink,
        key_secret: String,
    ) -> Self {
        Self {
            store,
            pool,
            client,
            registry,
            obs,
            key_secret,
        }
    }

    pub async fn handle_chat(&self, call: ChatCall) -> PipelineResponse {
        let started_at = OffsetDateTime::now_utc();
        let (machine_id, data) = match self
            .authenticate(call.machine_hint.as_deref(), call.presented_key.as_deref())
            .await
        {
            Ok(auth) => auth,
            Err(resp) => return resp,
        };

        let requested = call.path_model.clone().or_else(|| {
            call.body
                .get("model")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        });
        let Some(requested) = requested else {
            return PipelineResponse::error(400, "missing model", Some("invalid_request_error"));
        };

        let body_stream = call.body.get("stream").and_then(JsonValue::as_bool);
        let stream = call.stream_hint.unwrap_or_else(|| match call.source {
            // Ollama streams unless explicitly disabled.
            WireFormat::Ollama => body_stream.unwrap_or(true),
            _ => body_stream.unwrap_or(false),
        });

        let members = match resolve_model(&data, &requested) {
            Ok(ResolvedModel::Single(member)) => vec![member],
            Ok(ResolvedModel::Combo { name, members }) => {
                debug!(combo = %name, members = members.len(), "expanding combo");
                members
            }
            Err(err) => {
                return PipelineResponse::error(400, &err.to_string(), Some("invalid_request_error"))
            }
        };

        let input_chars = call.body.to_string().chars().count();
        let mut last_error: Option<PipelineResponse> = None;
        for member in &members {
            match self
                .dispatch_member(&machine_id, &call, member, &requested, stream, input_chars, started_at)
                .await
            {
                Ok(resp) => return resp,
                Err(resp) => last_error = Some(resp),
            }
        }
        last_error.unwrap_or_else(|| {
            PipelineResponse::error(500, "request could not be dispatched", None)
        })
    }

    /// `Ok` means a response began (success or a non-retryable upstream error
    /// on the last credential); `Err` means this combo member failed and the
    /// next one may run.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_member(
        &self,
        machine_id: &str,
        call: &ChatCall,
        member: &ProviderModel,
        requested: &str,
        stream: bool,
        input_chars: usize,
        started_at: OffsetDateTime,
    ) -> Result<PipelineResponse, PipelineResponse> {
        let Some(spec) = catalogue::find(&member.provider) else {
            return Err(PipelineResponse::error(
                400,
                &format!("unknown provider: {}", member.provider),
                Some("invalid_request_error"),
            ));
        };
        let provider_ids = spec.ids();
        let mut exclude: HashSet<String> = HashSet::new();

        loop {
            let now = OffsetDateTime::now_utc();
            let selected = {
                // Selection and the recency write happen under the
                // per-machine mutex against a freshly loaded document.
                let _guard = self.pool.machine_guard(machine_id).await;
                let mut data = match self.store.load(machine_id).await {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        return Err(PipelineResponse::error(404, "unknown machine", None));
                    }
                    Err(err) => {
                        return Err(PipelineResponse::error(500, &err.to_string(), None));
                    }
                };
                match self.pool.select(
                    &mut data,
                    &provider_ids,
                    Some(&member.model),
                    spec.multi_bucket,
                    &exclude,
                    now,
                ) {
                    SelectOutcome::Selected(selected) => {
                        if let Err(err) = self.store.save(machine_id, &data).await {
                            warn!(error = %err, "recency persist failed");
                        }
                        selected
                    }
                    SelectOutcome::AllRateLimited {
                        retry_at,
                        last_error,
                        last_error_code,
                    } => {
                        return Err(rate_limited_response(
                            member, retry_at, last_error, last_error_code, now,
                        ));
                    }
                    SelectOutcome::NoCredentials => {
                        return Err(PipelineResponse::error(
                            400,
                            &format!("no credentials for provider {}", member.provider),
                            Some("invalid_request_error"),
                        ));
                    }
                }
            };

            let mut connection = selected.connection.clone();
            self.maybe_refresh(machine_id, &selected.connection_id, spec, &mut connection, now)
                .await;

            let target = spec.wire;
            let body = if call.source == target {
                let mut body = call.body.clone();
                if let Some(obj) = body.as_object_mut() {
                    if obj.contains_key("model") {
                        obj.insert(
                            "model".to_string(),
                            JsonValue::String(member.model.clone()),
                        );
                    }
                }
                body
            } else {
                let ctx = RequestCtx {
                    model: &member.model,
                    body: &call.body,
                    stream,
                    creds: Some(&connection.provider_specific_data),
                };
                match self.registry.translate_request(call.source, target, &ctx) {
                    Ok(body) => body,
                    Err(err) => {
                        return Err(PipelineResponse::error(
                            400,
                            &err.to_string(),
                            Some("invalid_request_error"),
                        ));
                    }
                }
            };

            let plan = ExecutePlan {
                spec,
                model: &member.model,
                body,
                stream,
                connection: &connection,
            };
            match execute(self.client.as_ref(), plan).await {
                Err(transport) => {
                    self.apply_failure(
                        machine_id,
                        &selected.connection_id,
                        &connection,
                        Some(&member.model),
                        spec,
                        None,
                        &transport.to_string(),
                        None,
                        now,
                    )
                    .await;
                    exclude.insert(selected.connection_id.clone());
                }
                Ok(resp) if resp.status >= 400 => {
                    let error_text = resp
                        .body_bytes()
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .unwrap_or_default();
                    let retry_hint = parse_retry_hint(&resp.headers);
                    let decision = self
                        .apply_failure(
                            machine_id,
                            &selected.connection_id,
                            &connection,
                            Some(&member.model),
                            spec,
                            Some(resp.status),
                            &error_text,
                            retry_hint,
                            now,
                        )
                        .await;
                    if decision.fallback {
                        info!(
                            provider = spec.id,
                            connection = %selected.connection_id,
                            status = resp.status,
                            "upstream failure, falling back"
                        );
                        exclude.insert(selected.connection_id.clone());
                        continue;
                    }
                    self.record_error(
                        machine_id, call, member, &selected.connection_id, stream, started_at,
                        resp.status, &error_text,
                    );
                    return Err(passthrough_response(resp));
                }
                Ok(resp) => {
                    self.write_back_success(machine_id, &selected.connection_id, &connection);
                    return Ok(self
                        .finish_success(
                            machine_id, call, member, spec, &selected.connection_id, requested,
                            stream, input_chars, started_at, resp,
                        )
                        .await);
                }
            }
        }
    }

    async fn maybe_refresh(
        &self,
        machine_id: &str,
        connection_id: &str,
        spec: &'static ProviderSpec,
        connection: &mut ProviderConnection,
        now: OffsetDateTime,
    ) {
        if !needs_refresh(spec, connection, now) {
            return;
        }
        match refresh(self.client.as_ref(), spec, connection, now).await {
            Ok(tokens) => {
                connection.access_token = Some(tokens.access_token.clone());
                if tokens.refresh_token.is_some() {
                    connection.refresh_token = tokens.refresh_token.clone();
                }
                connection.expires_at = Some(tokens.expires_at);
                let persisted = tokens.clone();
                if let Err(err) = self
                    .store
                    .update_connection(machine_id, connection_id, move |conn| {
                        conn.access_token = Some(persisted.access_token);
                        if let Some(refresh_token) = persisted.refresh_token {
                            conn.refresh_token = Some(refresh_token);
                        }
                        conn.expires_at = Some(persisted.expires_at);
                    })
                    .await
                {
                    warn!(error = %err, "token write-back failed");
                }
            }
            // Proceed with the stale token; a 401 will drive fallback.
            Err(err) => warn!(provider = spec.id, error = %err, "token refresh failed"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_failure(
        &self,
        machine_id: &str,
        connection_id: &str,
        connection: &ProviderConnection,
        model: Option<&str>,
        spec: &'static ProviderSpec,
        status: Option<u16>,
        error_text: &str,
        retry_hint: Option<std::time::Duration>,
        now: OffsetDateTime,
    ) -> FailureDecision {
        let mut mutated = connection.clone();
        let decision = self.pool.mark_failed(
            connection_id,
            &mut mutated,
            model,
            spec.multi_bucket,
            status,
            error_text,
            retry_hint,
            now,
        );
        let model_lock_only =
            spec.multi_bucket && decision.effective_status == Some(429) && model.is_some();
        if decision.fallback && !model_lock_only {
            let health = mutated.health.clone();
            if let Err(err) = self
                .store
                .update_connection(machine_id, connection_id, move |conn| {
                    conn.health = health;
                })
                .await
            {
                warn!(error = %err, "health write failed");
            }
        }
        decision
    }

    /// Clear the error triple in the background; a clean connection skips
    /// the write entirely.
    fn write_back_success(
        &self,
        machine_id: &str,
        connection_id: &str,
        connection: &ProviderConnection,
    ) {
        let mut probe = connection.clone();
        if !self.pool.mark_success(&mut probe) {
            return;
        }
        let store = self.store.clone();
        let pool = self.pool.clone();
        let machine_id = machine_id.to_string();
        let connection_id = connection_id.to_string();
        tokio::spawn(async move {
            let result = store
                .update_connection(&machine_id, &connection_id, |conn| {
                    pool.mark_success(conn);
                })
                .await;
            if let Err(err) = result {
                warn!(error = %err, "success write failed");
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_success(
        &self,
        machine_id: &str,
        call: &ChatCall,
        member: &ProviderModel,
        spec: &'static ProviderSpec,
        connection_id: &str,
        requested: &str,
        stream: bool,
        input_chars: usize,
        started_at: OffsetDateTime,
        resp: UpstreamResponse,
    ) -> PipelineResponse {
        let config = EngineConfig {
            source: spec.wire.stream_dialect(),
            target: call.source,
            model: requested.to_string(),
            fallback_id: call.trace_id.clone(),
            input_chars,
        };

        if stream {
            let upstream_rx = match resp.body {
                UpstreamBody::Stream(rx) => rx,
                UpstreamBody::Bytes(bytes) => {
                    // Upstream ignored the stream request: aggregate and ship
                    // a single frame.
                    return self.nonstream_as_sse(
                        machine_id, call, member, connection_id, &config, started_at, resp.status,
                        bytes,
                    );
                }
            };
            let recorder = self.recorder(machine_id, call, member, connection_id, started_at, true, 200);
            let client_rx = engine::spawn_stream(
                self.registry.clone(),
                config,
                upstream_rx,
                Box::new(move |outcome| recorder(outcome)),
            );
            return sse_response(PipelineBody::Stream(client_rx));
        }

        let bytes = match resp.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(mut rx) => {
                let mut buf = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk);
                }
                Bytes::from(buf)
            }
        };
        match engine::translate_nonstream(&config, &bytes) {
            Ok((value, outcome)) => {
                let recorder =
                    self.recorder(machine_id, call, member, connection_id, started_at, false, resp.status);
                recorder(outcome);
                PipelineResponse::json(
                    resp.status,
                    Bytes::from(serde_json::to_vec(&value).unwrap_or_default()),
                )
            }
            Err(err) => {
                warn!(error = %err, "non-stream translation failed, passing through");
                PipelineResponse::json(resp.status, bytes)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn nonstream_as_sse(
        &self,
        machine_id: &str,
        call: &ChatCall,
        member: &ProviderModel,
        connection_id: &str,
        config: &EngineConfig,
        started_at: OffsetDateTime,
        status: u16,
        bytes: Bytes,
    ) -> PipelineResponse {
        let (tx, rx) = mpsc::channel::<Bytes>(4);
        match engine::translate_nonstream(config, &bytes) {
            Ok((value, outcome)) => {
                let recorder =
                    self.recorder(machine_id, call, member, connection_id, started_at, true, status);
                recorder(outcome);
                let payload = serde_json::to_vec(&value).unwrap_or_default();
                let mut frame = Vec::with_capacity(payload.len() + 16);
                frame.extend_from_slice(b"data: ");
                frame.extend_from_slice(&payload);
                frame.extend_from_slice(b"\n\n");
                let _ = tx.try_send(Bytes::from(frame));
            }
            Err(err) => warn!(error = %err, "buffered upstream body was not JSON"),
        }
        let _ = tx.try_send(Bytes::from_static(DONE_FRAME));
        sse_response(PipelineBody::Stream(rx))
    }

    /// Build the completion recorder: request detail plus a usage record,
    /// both best-effort.
    fn recorder(
        &self,
        machine_id: &str,
        call: &ChatCall,
        member: &ProviderModel,
        connection_id: &str,
        started_at: OffsetDateTime,
        streaming: bool,
        status: u16,
    ) -> impl FnOnce(StreamOutcome) + Send + 'static {
        let obs = self.obs.clone();
        let machine_id = machine_id.to_string();
        let trace_id = call.trace_id.clone();
        let source = call.source;
        let provider = member.provider.clone();
        let model = member.model.clone();
        let connection_id = connection_id.to_string();
        move |outcome: StreamOutcome| {
            let now = OffsetDateTime::now_utc();
            let target = outcome.detected.unwrap_or(source);
            obs.record_request(RequestDetailRecord {
                trace_id,
                machine_id: machine_id.clone(),
                provider: provider.clone(),
                model: model.clone(),
                connection_id: Some(connection_id.clone()),
                source_format: source.as_str().to_string(),
                target_format: target.as_str().to_string(),
                streaming,
                status,
                started_at,
                ttft_ms: outcome
                    .ttft
                    .map(|t| (t - started_at).whole_milliseconds() as i64),
                duration_ms: Some((now - started_at).whole_milliseconds() as i64),
                content_len: outcome.content_len as i64,
                thinking_len: outcome.thinking_len as i64,
                input_tokens: outcome
                    .usage
                    .and_then(|u| u.input_tokens)
                    .map(i64::from),
                output_tokens: outcome
                    .usage
                    .and_then(|u| u.output_tokens)
                    .map(i64::from),
                usage_estimated: outcome.usage_estimated,
                error: outcome.cancelled.then(|| "client disconnected".to_string()),
                detail: None,
            });
            if let Some(usage) = outcome.usage {
                obs.record_usage(UsageRecord {
                    machine_id,
                    provider,
                    model,
                    connection_id: Some(connection_id),
                    input_tokens: usage.input_tokens.unwrap_or(0) as i64,
                    output_tokens: usage.output_tokens.unwrap_or(0) as i64,
                    estimated: outcome.usage_estimated,
                    at: now,
                });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_error(
        &self,
        machine_id: &str,
        call: &ChatCall,
        member: &ProviderModel,
        connection_id: &str,
        streaming: bool,
        started_at: OffsetDateTime,
        status: u16,
        error_text: &str,
    ) {
        self.obs.record_request(RequestDetailRecord {
            trace_id: call.trace_id.clone(),
            machine_id: machine_id.to_string(),
            provider: member.provider.clone(),
            model: member.model.clone(),
            connection_id: Some(connection_id.to_string()),
            source_format: call.source.as_str().to_string(),
            target_format: call.source.as_str().to_string(),
            streaming,
            status,
            started_at,
            ttft_ms: None,
            duration_ms: Some(
                (OffsetDateTime::now_utc() - started_at).whole_milliseconds() as i64,
            ),
            content_len: 0,
            thinking_len: 0,
            input_tokens: None,
            output_tokens: None,
            usage_estimated: false,
            error: Some(truncate(error_text, 512)),
            detail: None,
        });
    }

    /// Resolve the machine and validate the presented key against it.
    pub async fn authenticate(
        &self,
        machine_hint: Option<&str>,
        presented_key: Option<&str>,
    ) -> Result<(String, MachineData), PipelineResponse> {
        let parsed = presented_key.and_then(|key| parse_key(&self.key_secret, key));

        let machine_id = match (machine_hint, &parsed) {
            (Some(hint), _) => hint.to_string(),
            (None, Some(ParsedKey::Machine { machine_id, .. })) => machine_id.clone(),
            (None, Some(ParsedKey::Legacy)) => {
                return Err(PipelineResponse::error(
                    400,
                    "legacy keys require the machine-prefixed path",
                    Some("invalid_request_error"),
                ));
            }
            (None, None) => {
                return Err(PipelineResponse::error(
                    401,
                    "missing or malformed api key",
                    Some("authentication_error"),
                ));
            }
        };

        let data = match self.store.load(&machine_id).await {
            Ok(Some(data)) => data,
            Ok(None) => return Err(PipelineResponse::error(404, "unknown machine", None)),
            Err(err) => return Err(PipelineResponse::error(500, &err.to_string(), None)),
        };

        if data.settings.require_api_key {
            let Some(key) = presented_key else {
                return Err(PipelineResponse::error(
                    401,
                    "api key required",
                    Some("authentication_error"),
                ));
            };
            if data.find_active_key(key).is_none() {
                return Err(PipelineResponse::error(
                    401,
                    "unknown api key",
                    Some("authentication_error"),
                ));
            }
        }
        Ok((machine_id, data))
    }

    /// Logical model ids this machine can serve: enabled models per active
    /// connection, aliases, combos.
    pub async fn list_model_ids(
        &self,
        machine_hint: Option<&str>,
        presented_key: Option<&str>,
    ) -> Result<Vec<String>, PipelineResponse> {
        let (_, data) = self.authenticate(machine_hint, presented_key).await?;
        let mut ids = BTreeSet::new();
        for conn in data.providers.values().filter(|c| c.is_active) {
            let Some(spec) = catalogue::find(&conn.provider) else {
                continue;
            };
            if let Some(models) = conn
                .provider_specific_data
                .get("enabledModels")
                .and_then(JsonValue::as_array)
            {
                for model in models.iter().filter_map(JsonValue::as_str) {
                    if model.contains('/') {
                        ids.insert(model.to_string());
                    } else {
                        ids.insert(format!("{}/{model}", spec.id));
                    }
                }
            }
        }
        for alias in data.model_aliases.keys() {
            ids.insert(alias.clone());
        }
        for combo in &data.combos {
            ids.insert(combo.name.clone());
        }
        Ok(ids.into_iter().collect())
    }

    pub async fn verify_key(
        &self,
        machine_hint: Option<&str>,
        presented_key: Option<&str>,
    ) -> PipelineResponse {
        match self.authenticate(machine_hint, presented_key).await {
            Ok(_) => PipelineResponse::json(
                200,
                Bytes::from(serde_json::to_vec(&json!({"valid": true})).unwrap_or_default()),
            ),
            Err(resp) => resp,
        }
    }

    /// OpenAI embeddings: resolve the model, require an OpenAI-compatible
    /// provider, forward with the upstream model id.
    pub async fn embeddings(
        &self,
        machine_hint: Option<&str>,
        presented_key: Option<&str>,
        mut body: JsonValue,
    ) -> PipelineResponse {
        let (machine_id, data) = match self.authenticate(machine_hint, presented_key).await {
            Ok(auth) => auth,
            Err(resp) => return resp,
        };
        let Some(requested) = body.get("model").and_then(JsonValue::as_str).map(str::to_string)
        else {
            return PipelineResponse::error(400, "missing model", Some("invalid_request_error"));
        };
        let member = match resolve_model(&data, &requested) {
            Ok(ResolvedModel::Single(member)) => member,
            Ok(ResolvedModel::Combo { .. }) => {
                return PipelineResponse::error(
                    400,
                    "combos are not supported for embeddings",
                    Some("invalid_request_error"),
                );
            }
            Err(err) => {
                return PipelineResponse::error(400, &err.to_string(), Some("invalid_request_error"))
            }
        };
        let Some(spec) = catalogue::find(&member.provider) else {
            return PipelineResponse::error(400, "unknown provider", None);
        };
        if spec.wire != WireFormat::OpenAI {
            return PipelineResponse::error(
                400,
                &format!("provider {} does not serve embeddings", spec.id),
                Some("invalid_request_error"),
            );
        }

        let now = OffsetDateTime::now_utc();
        let selected = {
            let _guard = self.pool.machine_guard(&machine_id).await;
            let mut data = match self.store.load(&machine_id).await {
                Ok(Some(data)) => data,
                _ => return PipelineResponse::error(404, "unknown machine", None),
            };
            match self.pool.select(
                &mut data,
                &spec.ids(),
                Some(&member.model),
                spec.multi_bucket,
                &HashSet::new(),
                now,
            ) {
                SelectOutcome::Selected(selected) => {
                    let _ = self.store.save(&machine_id, &data).await;
                    selected
                }
                SelectOutcome::AllRateLimited {
                    retry_at,
                    last_error,
                    last_error_code,
                } => {
                    return rate_limited_response(&member, retry_at, last_error, last_error_code, now)
                }
                SelectOutcome::NoCredentials => {
                    return PipelineResponse::error(
                        400,
                        &format!("no credentials for provider {}", member.provider),
                        Some("invalid_request_error"),
                    );
                }
            }
        };

        body["model"] = JsonValue::String(member.model.clone());
        let base = selected
            .connection
            .provider_specific_data
            .get("baseUrl")
            .and_then(JsonValue::as_str)
            .unwrap_or(spec.base_urls[0])
            .trim_end_matches('/')
            .to_string();
        let req = promux_providers::UpstreamRequest {
            method: promux_providers::HttpMethod::Post,
            url: format!("{base}/embeddings"),
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                (
                    "authorization".to_string(),
                    format!("Bearer {}", selected.connection.bearer_secret().unwrap_or_default()),
                ),
            ],
            body: Some(Bytes::from(serde_json::to_vec(&body).unwrap_or_default())),
            stream: false,
        };
        match self.client.send(req).await {
            Ok(resp) => passthrough_response(resp),
            Err(err) => PipelineResponse::error(502, &err.to_string(), Some("api_error")),
        }
    }
}

fn sse_response(body: PipelineBody) -> PipelineResponse {
    PipelineResponse {
        status: 200,
        headers: vec![
            ("content-type".to_string(), "text/event-stream".to_string()),
            ("cache-control".to_string(), "no-cache".to_string()),
            ("x-accel-buffering".to_string(), "no".to_string()),
        ],
        body,
    }
}

fn passthrough_response(resp: UpstreamResponse) -> PipelineResponse {
    let body = match resp.body {
        UpstreamBody::Bytes(bytes) => PipelineBody::Bytes(bytes),
        UpstreamBody::Stream(rx) => PipelineBody::Stream(rx),
    };
    PipelineResponse {
        status: resp.status,
        headers: resp.headers,
        body,
    }
}

fn rate_limited_response(
    member: &ProviderModel,
    retry_at: OffsetDateTime,
    last_error: Option<String>,
    last_error_code: Option<u16>,
    now: OffsetDateTime,
) -> PipelineResponse {
    let wait_ms = (retry_at - now).whole_milliseconds().max(0) as u64;
    let retry_secs = wait_ms.div_ceil(1000).max(1);
    let resets = retry_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| retry_at.to_string());
    let detail = last_error.unwrap_or_else(|| "rate limited".to_string());
    let code = last_error_code.map(|c| format!(" (status {c})")).unwrap_or_default();
    PipelineResponse::error(
        503,
        &format!(
            "all credentials for {}/{} are rate-limited{code}: {detail}; resets at {resets}",
            member.provider, member.model
        ),
        Some("rate_limit_error"),
    )
    .with_header("retry-after", retry_secs.to_string())
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
