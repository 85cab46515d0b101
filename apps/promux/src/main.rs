use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use promux_common::ObservabilityConfig;
use promux_core::Pipeline;
use promux_pool::CredentialPool;
use promux_providers::{UpstreamClient, WreqUpstreamClient};
use promux_router::{proxy_router, RouterState};
use promux_storage::{MachineStore, ObservabilitySink};
use promux_translate::TranslateRegistry;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = cli::Cli::parse().into_config();

    let machine_db = promux_storage::connect(&config.machine_dsn).await?;
    promux_storage::init_machine_schema(&machine_db).await?;
    let store = MachineStore::new(machine_db);

    let obs_config = ObservabilityConfig::from_env();
    let obs = if obs_config.enabled {
        let obs_db = promux_storage::connect(&config.observability_dsn).await?;
        promux_storage::init_observability_schema(&obs_db).await?;
        ObservabilitySink::spawn(obs_db, obs_config)
    } else {
        ObservabilitySink::disabled()
    };

    let client: Arc<dyn UpstreamClient> =
        Arc::new(WreqUpstreamClient::new(promux_providers::client::UpstreamClientConfig {
            proxy: config.proxy.clone(),
            ..Default::default()
        })?);
    let pool = Arc::new(CredentialPool::new());
    let registry = Arc::new(TranslateRegistry::new());
    let pipeline = Arc::new(Pipeline::new(
        store,
        pool,
        client.clone(),
        registry,
        obs,
        config.key_secret.clone(),
    ));

    let app = proxy_router(RouterState { pipeline, client });

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
