use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hub_api::app_state::AppState;
use hub_api::config::HubConfig;
use hub_api::web::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = HubConfig::from_env().context("invalid configuration")?;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(app = %config.app_name, %addr, "starting control-plane api");

    let state = Arc::new(AppState::new(config).context("state initialization failed")?);
    state.spawn_workers();
    state.sink.info("system", "control-plane api started", None);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    axum::serve(listener, build_router(state))
        .await
        .context("server terminated")?;
    Ok(())
}
