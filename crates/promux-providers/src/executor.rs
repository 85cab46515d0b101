//! Provider executors: URL and header construction, provider-specific body
//! post-processing, retry-after handling and ordered URL fallbacks.

use std::time::Duration;

use bytes::Bytes;
use promux_common::ProviderConnection;
use promux_protocol::WireFormat;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalogue::{AuthScheme, ProviderSpec};
use crate::client::{
    HttpMethod, UpstreamClient, UpstreamFailure, UpstreamRequest, UpstreamResponse,
};
use crate::retry::parse_retry_hint;

/// Sleep-and-retry only when the provider asks for at most this long.
const MAX_INLINE_WAIT: Duration = Duration::from_secs(5);
/// Attempts per URL when a 429 carries no usable hint.
const MAX_ATTEMPTS_PER_URL: u32 = 2;
const NO_HINT_SLEEP: Duration = Duration::from_secs(1);

const USER_AGENT: &str = concat!("promux/", env!("CARGO_PKG_VERSION"));
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ExecutePlan<'a> {
    pub spec: &'static ProviderSpec,
    /// Upstream model id (provider prefix stripped).
    pub model: &'a str,
    /// Already translated into the provider dialect.
    pub body: JsonValue,
    pub stream: bool,
    pub connection: &'a ProviderConnection,
}

pub async fn execute(
    client: &dyn UpstreamClient,
    mut plan: ExecutePlan<'_>,
) -> Result<UpstreamResponse, UpstreamFailure> {
    finalize_body(&mut plan);
    let payload = Bytes::from(serde_json::to_vec(&plan.body).unwrap_or_default());

    let override_url = plan
        .connection
        .provider_specific_data
        .get("baseUrl")
        .and_then(JsonValue::as_str)
        .map(|s| s.trim_end_matches('/').to_string());
    let mut bases: Vec<String> = Vec::new();
    bases.extend(override_url);
    bases.extend(plan.spec.base_urls.iter().map(|s| s.to_string()));

    let mut last_response: Option<UpstreamResponse> = None;
    let mut last_failure: Option<UpstreamFailure> = None;

    for base in &bases {
        let url = build_url(&plan, base);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let req = UpstreamRequest {
                method: HttpMethod::Post,
                url: url.clone(),
                headers: build_headers(&plan),
                body: Some(payload.clone()),
                stream: plan.stream,
            };
            match client.send(req).await {
                Err(failure) => {
                    warn!(provider = plan.spec.id, url = %url, error = %failure, "upstream transport failure");
                    last_failure = Some(failure);
                    break; // next fallback URL
                }
                Ok(resp) if resp.status == 429 || resp.status == 503 => {
                    let hint = parse_retry_hint(&resp.headers);
                    match hint {
                        // An honoured short hint always retries the same URL;
                        // the attempt cap governs only the hint-less case.
                        Some(wait) if wait <= MAX_INLINE_WAIT => {
                            debug!(provider = plan.spec.id, wait_ms = wait.as_millis() as u64, "honouring retry-after");
                            tokio::time::sleep(wait).await;
                            last_response = Some(resp);
                            continue; // same URL
                        }
                        Some(_) => {
                            last_response = Some(resp);
                            break; // wait too long, try next URL
                        }
                        None if resp.status == 429 && attempt < MAX_ATTEMPTS_PER_URL => {
                            tokio::time::sleep(NO_HINT_SLEEP).await;
                            last_response = Some(resp);
                            continue;
                        }
                        None => {
                            last_response = Some(resp);
                            break;
                        }
                    }
                }
                Ok(resp) if (500..600).contains(&resp.status) => {
                    last_response = Some(resp);
                    break; // next fallback URL
                }
                Ok(resp) => return Ok(resp),
            }
        }
    }

    match (last_response, last_failure) {
        (Some(resp), _) => Ok(resp),
        (None, Some(failure)) => Err(failure),
        (None, None) => Err(UpstreamFailure {
            message: "no upstream base url configured".to_string(),
            timeout: false,
        }),
    }
}

fn build_url(plan: &ExecutePlan<'_>, base: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut url = match plan.spec.wire {
        WireFormat::Gemini => {
            let action = if plan.stream {
                "streamGenerateContent?alt=sse"
            } else {
                "generateContent"
            };
            format!("{base}/models/{}:{action}", plan.model)
        }
        WireFormat::Antigravity => {
            let action = if plan.stream {
                "streamGenerateContent?alt=sse"
            } else {
                "generateContent"
            };
            format!("{base}:{action}")
        }
        _ => format!("{base}{}", plan.spec.chat_path),
    };
    if plan.spec.auth == AuthScheme::QueryKey {
        let key = plan.connection.bearer_secret().unwrap_or_default();
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str("key=");
        url.push_str(key);
    }
    url
}

fn build_headers(plan: &ExecutePlan<'_>) -> Vec<(String, String)> {
    let mut headers = vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("user-agent".to_string(), USER_AGENT.to_string()),
    ];
    if plan.stream {
        headers.push(("accept".to_string(), "text/event-stream".to_string()));
    } else {
        headers.push(("accept".to_string(), "application/json".to_string()));
    }
    let secret = plan.connection.bearer_secret().unwrap_or_default();
    match plan.spec.auth {
        AuthScheme::Bearer => {
            headers.push(("authorization".to_string(), format!("Bearer {secret}")));
        }
        AuthScheme::XApiKey => {
            headers.push(("x-api-key".to_string(), secret.to_string()));
            headers.push((
                "anthropic-version".to_string(),
                ANTHROPIC_VERSION.to_string(),
            ));
        }
        AuthScheme::QueryKey => {}
    }
    if plan.spec.wire == WireFormat::Kiro {
        headers.push((
            "amz-sdk-invocation-id".to_string(),
            Uuid::new_v4().to_string(),
        ));
    }
    headers
}

/// Provider-specific body post-processing that needs credential material or
/// per-request identity.
fn finalize_body(plan: &mut ExecutePlan<'_>) {
    match plan.spec.wire {
        WireFormat::Antigravity => {
            let Some(obj) = plan.body.as_object_mut() else {
                return;
            };
            let project = plan
                .connection
                .project_id
                .clone()
                .or_else(|| {
                    plan.connection
                        .provider_specific_data
                        .get("projectId")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_default();
            obj.insert("project".to_string(), JsonValue::String(project));
            obj.entry("model".to_string())
                .or_insert_with(|| JsonValue::String(plan.model.to_string()));
            if let Some(request) = obj.get_mut("request").and_then(JsonValue::as_object_mut) {
                request.insert(
                    "sessionId".to_string(),
                    JsonValue::String(Uuid::new_v4().to_string()),
                );
                if !request.contains_key("toolConfig") {
                    request.insert(
                        "toolConfig".to_string(),
                        json!({"functionCallingConfig": {"mode": "AUTO"}}),
                    );
                }
            }
            obj.insert(
                "requestId".to_string(),
                JsonValue::String(Uuid::new_v4().to_string()),
            );
        }
        WireFormat::Kiro => {
            // Translators set profileArn when present; nothing else to do.
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue;

    fn plan_for<'a>(
        provider: &str,
        model: &'a str,
        connection: &'a ProviderConnection,
        stream: bool,
    ) -> ExecutePlan<'a> {
        ExecutePlan {
            spec: catalogue::find(provider).unwrap(),
            model,
            body: json!({}),
            stream,
            connection,
        }
    }

    fn connection() -> ProviderConnection {
        ProviderConnection {
            provider: "gemini".to_string(),
            is_active: true,
            priority: 0,
            api_key: Some("secret-key".to_string()),
            access_token: None,
            refresh_token: None,
            expires_at: None,
            project_id: Some("proj-1".to_string()),
            provider_specific_data: Default::default(),
            health: Default::default(),
            usage: Default::default(),
        }
    }

    #[test]
    fn gemini_urls_carry_action_and_query_key() {
        let conn = connection();
        let plan = plan_for("gemini", "gemini-2.5-pro", &conn, true);
        let url = build_url(&plan, plan.spec.base_urls[0]);
        assert!(url.ends_with(":streamGenerateContent?alt=sse&key=secret-key"));
        let plan = plan_for("gemini", "gemini-2.5-pro", &conn, false);
        let url = build_url(&plan, plan.spec.base_urls[0]);
        assert!(url.contains("/models/gemini-2.5-pro:generateContent"));
    }

    #[test]
    fn anthropic_headers_use_x_api_key() {
        let conn = connection();
        let plan = plan_for("anthropic", "claude-sonnet-4-5", &conn, false);
        let headers = build_headers(&plan);
        assert!(headers.iter().any(|(k, v)| k == "x-api-key" && v == "secret-key"));
        assert!(headers.iter().any(|(k, _)| k == "anthropic-version"));
        assert!(!headers.iter().any(|(k, _)| k == "authorization"));
    }

    #[test]
    fn antigravity_body_gains_identity_fields() {
        let conn = connection();
        let mut plan = plan_for("antigravity", "gemini-3-pro", &conn, true);
        plan.body = json!({"model": "gemini-3-pro", "request": {"contents": []}});
        finalize_body(&mut plan);
        assert_eq!(plan.body["project"], "proj-1");
        assert!(plan.body["requestId"].is_string());
        assert!(plan.body["request"]["sessionId"].is_string());
        assert_eq!(
            plan.body["request"]["toolConfig"]["functionCallingConfig"]["mode"],
            "AUTO"
        );
    }
}
