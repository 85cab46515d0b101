use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

/// The per-operator document. Stored as one JSON blob keyed by machine id;
/// external configuration flows create and edit it, the proxy only mutates
/// connection health, recency and refreshed tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MachineData {
    pub api_keys: Vec<ApiKey>,
    /// Keyed by connection id (opaque string).
    pub providers: BTreeMap<String, ProviderConnection>,
    /// User alias -> canonical `provider/model`.
    pub model_aliases: BTreeMap<String, String>,
    pub combos: Vec<Combo>,
    pub settings: MachineSettings,
}

impl MachineData {
    pub fn find_active_key(&self, presented: &str) -> Option<&ApiKey> {
        self.api_keys
            .iter()
            .find(|k| k.is_active && k.key == presented)
    }

    pub fn combo(&self, name: &str) -> Option<&Combo> {
        self.combos.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

/// Named, ordered bundle of canonical models tried in sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combo {
    pub name: String,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MachineSettings {
    pub fallback_strategy: FallbackStrategy,
    pub sticky_round_robin_limit: u32,
    pub require_api_key: bool,
    pub observability: JsonValue,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            fallback_strategy: FallbackStrategy::FillFirst,
            sticky_round_robin_limit: 3,
            require_api_key: true,
            observability: JsonValue::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackStrategy {
    #[serde(rename = "fill-first")]
    FillFirst,
    #[serde(rename = "round-robin")]
    RoundRobin,
}

/// One configured credential for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConnection {
    /// Canonical provider id (or an alias resolved at selection time).
    pub provider: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Lower is preferred under fill-first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Free-form bag: `profileArn`, `baseUrl`, `enabledModels`, ...
    #[serde(default)]
    pub provider_specific_data: serde_json::Map<String, JsonValue>,
    #[serde(default)]
    pub health: ConnectionHealth,
    #[serde(default)]
    pub usage: ConnectionUsage,
}

impl ProviderConnection {
    /// Bearer-style secret: OAuth access token wins over a static API key.
    pub fn bearer_secret(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.api_key.as_deref().filter(|k| !k.is_empty()))
    }

    pub fn rate_limited_at(&self, now: OffsetDateTime) -> bool {
        matches!(self.health.rate_limited_until, Some(until) if until > now)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionHealth {
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_error_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub rate_limited_until: Option<OffsetDateTime>,
    pub backoff_level: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Active,
    Unavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionUsage {
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_used_at: Option<OffsetDateTime>,
    pub consecutive_use_count: u32,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_document_round_trips_camel_case() {
        let raw = serde_json::json!({
            "apiKeys": [{"id": "k1", "key": "sk-m1-k1-deadbeef", "name": "default", "isActive": true}],
            "providers": {
                "c1": {
                    "provider": "openai",
                    "isActive": true,
                    "priority": 1,
                    "apiKey": "sk-upstream",
                    "providerSpecificData": {"baseUrl": "https://api.openai.com/v1"},
                    "health": {"status": "active", "backoffLevel": 0},
                    "usage": {"consecutiveUseCount": 2}
                }
            },
            "modelAliases": {"fast": "groq/llama-3.3-70b-versatile"},
            "combos": [{"name": "best", "models": ["openai/gpt-4o", "anthropic/claude-sonnet-4-5"]}],
            "settings": {"fallbackStrategy": "round-robin", "stickyRoundRobinLimit": 5, "requireApiKey": false}
        });
        let data: MachineData = serde_json::from_value(raw).unwrap();
        assert_eq!(data.settings.fallback_strategy, FallbackStrategy::RoundRobin);
        assert_eq!(data.settings.sticky_round_robin_limit, 5);
        assert!(!data.settings.require_api_key);
        assert_eq!(data.providers["c1"].usage.consecutive_use_count, 2);

        let back = serde_json::to_value(&data).unwrap();
        assert_eq!(back["providers"]["c1"]["provider"], "openai");
        assert_eq!(back["settings"]["fallbackStrategy"], "round-robin");
    }

    #[test]
    fn bearer_prefers_access_token() {
        let mut conn = ProviderConnection {
            provider: "qwen".to_string(),
            is_active: true,
            priority: 0,
            api_key: Some("static".to_string()),
            access_token: Some("oauth".to_string()),
            refresh_token: None,
            expires_at: None,
            project_id: None,
            provider_specific_data: Default::default(),
            health: Default::default(),
            usage: Default::default(),
        };
        assert_eq!(conn.bearer_secret(), Some("oauth"));
        conn.access_token = Some(String::new());
        assert_eq!(conn.bearer_secret(), Some("static"));
    }
}
