//! Per-provider OAuth access-token refresh.
//!
//! Fires shortly before expiry; a failed refresh is logged and the request
//! proceeds with the stale token, letting the resulting 401 drive fallback.

use std::time::Duration;

use bytes::Bytes;
use promux_common::ProviderConnection;
use serde_json::{json, Value as JsonValue};
use time::OffsetDateTime;
use tracing::debug;

use crate::catalogue::{OAuthEncoding, ProviderSpec};
use crate::client::{HttpMethod, UpstreamClient, UpstreamRequest};

/// Refresh when the token expires within this window.
pub const REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("provider has no refresh endpoint")]
    Unsupported,
    #[error("missing refresh token or client id")]
    MissingCredentials,
    #[error("transport: {0}")]
    Transport(String),
    #[error("refresh rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("bad token response: {0}")]
    Decode(String),
}

pub fn needs_refresh(spec: &ProviderSpec, conn: &ProviderConnection, now: OffsetDateTime) -> bool {
    if spec.oauth.is_none() || conn.refresh_token.as_deref().unwrap_or("").is_empty() {
        return false;
    }
    match conn.expires_at {
        Some(expires_at) => (expires_at - now).whole_seconds() < REFRESH_WINDOW.as_secs() as i64,
        None => false,
    }
}

pub async fn refresh(
    client: &dyn UpstreamClient,
    spec: &ProviderSpec,
    conn: &ProviderConnection,
    now: OffsetDateTime,
) -> Result<RefreshedTokens, RefreshError> {
    let oauth = spec.oauth.as_ref().ok_or(RefreshError::Unsupported)?;
    let refresh_token = conn
        .refresh_token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or(RefreshError::MissingCredentials)?;

    // Catalogue-level client id, overridable per credential (Kiro stores a
    // device-registration client there).
    let client_id = conn
        .provider_specific_data
        .get("clientId")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .or_else(|| (!oauth.client_id.is_empty()).then(|| oauth.client_id.to_string()))
        .ok_or(RefreshError::MissingCredentials)?;
    let client_secret = conn
        .provider_specific_data
        .get("clientSecret")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .or_else(|| oauth.client_secret.map(str::to_string));

    let (content_type, body) = match oauth.encoding {
        OAuthEncoding::Form => {
            let mut pairs = vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
            ];
            if let Some(secret) = client_secret {
                pairs.push(("client_secret", secret));
            }
            let encoded = serde_urlencoded::to_string(pairs)
                .map_err(|err| RefreshError::Decode(err.to_string()))?;
            ("application/x-www-form-urlencoded", Bytes::from(encoded))
        }
        OAuthEncoding::Json => {
            let mut payload = json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": client_id,
            });
            if let Some(secret) = client_secret {
                payload["client_secret"] = JsonValue::String(secret);
            }
            (
                "application/json",
                Bytes::from(serde_json::to_vec(&payload).unwrap_or_default()),
            )
        }
    };

    let req = UpstreamRequest {
        method: HttpMethod::Post,
        url: oauth.token_url.to_string(),
        headers: vec![
            ("content-type".to_string(), content_type.to_string()),
            ("accept".to_string(), "application/json".to_string()),
        ],
        body: Some(body),
        stream: false,
    };
    let resp = client
        .send(req)
        .await
        .map_err(|err| RefreshError::Transport(err.to_string()))?;

    let bytes = resp.body_bytes().cloned().unwrap_or_default();
    if !(200..300).contains(&resp.status) {
        return Err(RefreshError::Rejected {
            status: resp.status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    let payload: JsonValue =
        serde_json::from_slice(&bytes).map_err(|err| RefreshError::Decode(err.to_string()))?;
    let access_token = payload
        .get("access_token")
        .and_then(JsonValue::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RefreshError::Decode("missing access_token".to_string()))?
        .to_string();
    let expires_in = payload
        .get("expires_in")
        .and_then(JsonValue::as_i64)
        .unwrap_or(3600);
    debug!(provider = spec.id, expires_in, "access token refreshed");

    Ok(RefreshedTokens {
        access_token,
        refresh_token: payload
            .get("refresh_token")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        expires_at: now + Duration::from_secs(expires_in.max(0) as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue;

    fn oauth_conn(expires_in_secs: i64) -> ProviderConnection {
        ProviderConnection {
            provider: "gemini-cli".to_string(),
            is_active: true,
            priority: 0,
            api_key: None,
            access_token: Some("stale".to_string()),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some(OffsetDateTime::now_utc() + Duration::from_secs(expires_in_secs.max(0) as u64)),
            project_id: None,
            provider_specific_data: Default::default(),
            health: Default::default(),
            usage: Default::default(),
        }
    }

    #[test]
    fn refresh_window_is_five_minutes() {
        let spec = catalogue::find("gemini-cli").unwrap();
        let now = OffsetDateTime::now_utc();
        assert!(needs_refresh(spec, &oauth_conn(4 * 60), now));
        assert!(!needs_refresh(spec, &oauth_conn(10 * 60), now));
    }

    #[test]
    fn api_key_connections_never_refresh() {
        let spec = catalogue::find("openai").unwrap();
        let mut conn = oauth_conn(0);
        conn.provider = "openai".to_string();
        conn.refresh_token = None;
        assert!(!needs_refresh(spec, &conn, OffsetDateTime::now_utc()));
    }
}
