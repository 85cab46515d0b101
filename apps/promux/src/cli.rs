use clap::Parser;

#[derive(Parser)]
#[command(name = "promux", about = "multi-provider LLM routing proxy")]
pub(crate) struct Cli {
    #[arg(long, env = "PROMUX_HOST", default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, env = "PROMUX_PORT", default_value_t = 8317)]
    pub(crate) port: u16,
    /// Directory holding the SQLite databases.
    #[arg(long, env = "DATA_DIR", default_value = ".")]
    pub(crate) data_dir: String,
    /// Override the machine-data DSN (defaults to sqlite in data-dir).
    #[arg(long, env = "PROMUX_MACHINE_DSN", default_value = "")]
    pub(crate) machine_dsn: String,
    /// Override the observability DSN (defaults to sqlite in data-dir).
    #[arg(long, env = "PROMUX_OBSERVABILITY_DSN", default_value = "")]
    pub(crate) observability_dsn: String,
    /// Secret behind API-key checksums; set this in production.
    #[arg(long, env = "PROMUX_KEY_SECRET", default_value = "promux-dev-secret")]
    pub(crate) key_secret: String,
    /// Outbound proxy for upstream egress.
    #[arg(long, env = "PROMUX_PROXY")]
    pub(crate) proxy: Option<String>,
}

impl Cli {
    pub(crate) fn into_config(self) -> promux_common::ServerConfig {
        let data_dir = self.data_dir.trim_end_matches('/').to_string();
        let machine_dsn = if self.machine_dsn.is_empty() {
            format!("sqlite://{data_dir}/promux.db?mode=rwc")
        } else {
            self.machine_dsn
        };
        let observability_dsn = if self.observability_dsn.is_empty() {
            format!("sqlite://{data_dir}/observability.db?mode=rwc")
        } else {
            self.observability_dsn
        };
        promux_common::ServerConfig {
            host: self.host,
            port: self.port,
            data_dir,
            machine_dsn,
            observability_dsn,
            key_secret: self.key_secret,
            proxy: self.proxy,
        }
    }
}
