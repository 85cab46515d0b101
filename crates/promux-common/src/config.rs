use serde::{Deserialize, Serialize};

/// Final, merged process configuration. Merge order: CLI > ENV > defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    /// DSN of the machine-data database.
    pub machine_dsn: String,
    /// DSN of the observability database.
    pub observability_dsn: String,
    /// Secret used for API-key checksums. Must be overridden in production.
    pub key_secret: String,
    /// Optional outbound proxy for upstream egress.
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8317,
            data_dir: ".".to_string(),
            machine_dsn: String::new(),
            observability_dsn: String::new(),
            key_secret: "promux-dev-secret".to_string(),
            proxy: None,
        }
    }
}

/// Observability sink knobs, read from the environment.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    pub max_records: u64,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    /// Cap on any serialized JSON payload, in KB.
    pub max_json_kb: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_records: 1000,
            batch_size: 20,
            flush_interval_ms: 5000,
            max_json_kb: 1024,
        }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_parse("OBSERVABILITY_ENABLED").unwrap_or(defaults.enabled),
            max_records: env_parse("OBSERVABILITY_MAX_RECORDS").unwrap_or(defaults.max_records),
            batch_size: env_parse("OBSERVABILITY_BATCH_SIZE").unwrap_or(defaults.batch_size),
            flush_interval_ms: env_parse("OBSERVABILITY_FLUSH_INTERVAL_MS")
                .unwrap_or(defaults.flush_interval_ms),
            max_json_kb: env_parse("OBSERVABILITY_MAX_JSON_SIZE").unwrap_or(defaults.max_json_kb),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}
