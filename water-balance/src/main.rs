use anyhow::{Context, Result};
use water_balance::{config::AppConfig, metrics_server, observability, server, sources};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let server_cfg = cfg
        .server
        .as_ref()
        .context("the service needs a [server] section with bind_addr")?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let registry = sources::load_registry(&cfg).await?;
    let state = server::AppState::new(registry, cfg.reconcile.report_settings(), server_cfg.cache_entries);

    server::serve(&server_cfg.bind_addr, state).await
}
