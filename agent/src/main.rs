mod auth;
mod config;
mod config_file;
mod error;
mod routes;
mod state;
mod wgctl;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::AgentConfig;
use state::AgentState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AgentConfig::from_env()?;
    let bind_addr = config.bind_addr;
    let state = AgentState::new(config);

    let app = routes::build(state);

    info!("wgfleet-agent listening on {}", bind_addr);
    let listener = TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
