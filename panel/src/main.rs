mod agent_client;
mod config;
mod db;
mod dns;
mod drift;
mod error;
mod health_poller;
mod keygen;
mod migration;
mod models;
mod placement;
mod repo;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agent_client::AgentClientFactory;
use config::PanelConfig;
use dns::{DnsProviderClient, DnsRetryQueue};
use repo::{config_node_repo, endpoint_group_repo, node_repo};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = PanelConfig::from_env()?;
    let bind_addr = config.bind_addr;

    let db = db::open(&config.db_path)?;
    let agents = Arc::new(AgentClientFactory::new(config.agent_timeout));
    let dns_client = DnsProviderClient::new(
        config.dns_provider_base_url.clone(),
        config.dns_provider_token.clone(),
        config.agent_timeout,
    );
    let dns_queue = Arc::new(DnsRetryQueue::new(dns_client.clone(), config.dns_retry_interval));

    let state = AppState {
        db: db.clone(),
        agents: agents.clone(),
        dns_client: dns_client.clone(),
        dns_queue: dns_queue.clone(),
        config: Arc::new(config.clone()),
    };

    tokio::spawn(health_poller::run(
        db.clone(),
        agents.clone(),
        config.health_poll_interval,
        config.health_poll_startup_delay,
    ));

    tokio::spawn(auto_migrate_sweep(
        db,
        agents,
        dns_client,
        dns_queue,
        config.health_poll_interval,
    ));

    let app = routes::build(state);

    info!("wgfleet-panel listening on {}", bind_addr);
    let listener = TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Sweeps every endpoint group with `auto_migrate` set, moving peers off any
/// node whose `ConfigNode.is_healthy` the health poller has flagged false,
/// then re-syncs that config's DNS in the background.
async fn auto_migrate_sweep(
    db: db::Db,
    agents: Arc<AgentClientFactory>,
    dns_client: DnsProviderClient,
    dns_queue: Arc<DnsRetryQueue>,
    interval: Duration,
) {
    tokio::time::sleep(interval).await;
    loop {
        if let Err(e) = auto_migrate_round(&db, &agents, &dns_client, &dns_queue).await {
            warn!("auto-migrate sweep failed: {e}");
        }
        tokio::time::sleep(interval).await;
    }
}

async fn auto_migrate_round(
    db: &db::Db,
    agents: &Arc<AgentClientFactory>,
    dns_client: &DnsProviderClient,
    dns_queue: &Arc<DnsRetryQueue>,
) -> anyhow::Result<()> {
    for group in endpoint_group_repo::list_all(db)? {
        if !group.auto_migrate {
            continue;
        }
        let assignments = config_node_repo::list_for_config(db, &group.config_name)?;
        for assignment in assignments {
            if assignment.is_healthy {
                continue;
            }
            let Some(node) = node_repo::get_by_id(db, &assignment.node_id)? else {
                continue;
            };
            match migration::migrate_node_peers(db, agents, &group.config_name, &node.id).await {
                Ok(result) if result.migrated_count > 0 => {
                    info!(
                        "auto-migrated {}/{} peer(s) off unhealthy node {} for config '{}'",
                        result.migrated_count, result.total, node.name, group.config_name
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "auto-migrate failed for node {} in config '{}': {e}",
                        node.name, group.config_name
                    );
                    continue;
                }
            }
        }

        if let Err(e) = dns::sync_config_dns(db, dns_client, dns_queue, &group.config_name, true).await {
            warn!("background DNS sync failed for config '{}': {e}", group.config_name);
        }
    }
    Ok(())
}
