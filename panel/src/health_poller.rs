//! Background health poller.
//!
//! One task, bounded-fan-out over enabled nodes. Each round: health ->
//! (if healthy and interfaced) dump -> status, merged into `health_json`,
//! persisted along with `ConfigNode.is_healthy`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::agent_client::AgentClientFactory;
use crate::db::Db;
use crate::models::Node;
use crate::repo::{config_node_repo, interface_repo, node_repo};

const MAX_CONCURRENT_POLLS: usize = 8;
/// Grace window expressed in poll periods before a failed node is marked
/// unhealthy outright: last poll must have succeeded within this many tick
/// periods.
const GRACE_PERIODS: u32 = 2;

pub async fn run(db: Db, agents: Arc<AgentClientFactory>, poll_interval: Duration, startup_delay: Duration) {
    tokio::time::sleep(startup_delay).await;
    loop {
        if let Err(e) = poll_once(&db, &agents, poll_interval).await {
            warn!("health poll round failed: {e}");
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn poll_once(db: &Db, agents: &Arc<AgentClientFactory>, poll_interval: Duration) -> anyhow::Result<()> {
    let nodes = node_repo::list_enabled(db)?;
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_POLLS));
    let mut set = JoinSet::new();

    for node in nodes {
        let db = db.clone();
        let agents = agents.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            poll_node(&db, &agents, &node, poll_interval).await;
        });
    }

    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            warn!("health poll task panicked: {e}");
        }
    }
    Ok(())
}

async fn poll_node(db: &Db, agents: &AgentClientFactory, node: &Node, poll_interval: Duration) {
    let client = agents.for_node(&node.agent_url, &node.shared_secret);

    let health = client.health().await;
    let health_json = match health {
        Ok(_) => {
            let mut payload = json!({ "healthy": true });

            if let Ok(ifaces) = interface_repo::list_for_node(db, &node.id) {
                if let Some(iface) = ifaces.first() {
                    if let Ok(dump) = client.dump(&iface.interface_name).await {
                        let active = dump
                            .peers
                            .iter()
                            .filter(|p| is_recently_active(p.latest_handshake))
                            .count();
                        payload["active_peers"] = json!(active);
                        payload["peer_count"] = json!(dump.peers.len());
                    }
                }
            }

            if let Ok(status) = client.status().await {
                payload["system"] = json!({
                    "cpu_percent": status.system.cpu_percent,
                    "memory_percent": status.system.memory_percent,
                    "disk_percent": status.system.disk_percent,
                });
            }

            payload
        }
        Err(e) => {
            debug!("node {} health probe failed: {e}", node.name);
            json!({ "healthy": false, "error": e.to_string() })
        }
    };

    let healthy_now = health_json
        .get("healthy")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if let Err(e) = node_repo::update_health(db, &node.id, &health_json.to_string(), healthy_now) {
        warn!("failed to persist health for node {}: {e}", node.name);
        return;
    }

    let is_healthy = if healthy_now {
        true
    } else {
        within_grace_window(node, poll_interval)
    };

    if let Ok(configs) = config_node_repo::configs_for_node(db, &node.id) {
        for cfg in configs {
            let _ = config_node_repo::update_health(db, &cfg.config_name, &node.id, is_healthy);
        }
    }
}

fn is_recently_active(latest_handshake: Option<u64>) -> bool {
    const ACTIVE_WINDOW_SECS: u64 = 180;
    let Some(ts) = latest_handshake else { return false };
    let now = Utc::now().timestamp() as u64;
    now.saturating_sub(ts) <= ACTIVE_WINDOW_SECS
}

fn within_grace_window(node: &Node, poll_interval: Duration) -> bool {
    let Some(last_seen) = &node.last_seen else { return false };
    let Ok(parsed) = NaiveDateTime::parse_from_str(last_seen, "%Y-%m-%d %H:%M:%S") else {
        return false;
    };
    let age = Utc::now().naive_utc().signed_duration_since(parsed);
    let grace = poll_interval.as_secs() as i64 * GRACE_PERIODS as i64;
    age.num_seconds() <= grace
}
