//! Row types for the database tables backing nodes, interfaces, peers, and
//! their groupings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub agent_url: String,
    pub auth_type: String,
    #[serde(skip_serializing)]
    pub shared_secret: String,
    pub enabled: bool,
    pub weight: i64,
    pub max_peers: i64,
    pub group_id: Option<String>,
    pub health_json: String,
    pub last_seen: Option<String>,
    pub override_listen_port: Option<i64>,
    pub override_dns: Option<String>,
    pub override_mtu: Option<i64>,
    pub override_keepalive: Option<i64>,
    pub override_endpoint_allowed_ip: Option<String>,
    pub override_post_up: Option<String>,
    pub override_pre_down: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInterface {
    pub id: String,
    pub node_id: String,
    pub interface_name: String,
    pub endpoint: String,
    pub ip_pool_cidr: String,
    pub listen_port: Option<i64>,
    pub address: Option<String>,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub post_up: Option<String>,
    pub pre_down: Option<String>,
    pub mtu: Option<i64>,
    pub dns: Option<String>,
    pub table: Option<String>,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub node_id: String,
    pub interface_name: String,
    pub config_name: String,
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    pub preshared_key: Option<String>,
    pub persistent_keepalive: i64,
    pub name: Option<String>,
    pub latest_handshake: Option<i64>,
    pub transfer_rx: i64,
    pub transfer_tx: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAllocation {
    pub node_id: String,
    pub ip_address: String,
    pub peer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigNode {
    pub id: String,
    pub config_name: String,
    pub node_id: String,
    pub is_healthy: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointGroup {
    pub id: String,
    pub config_name: String,
    pub domain: String,
    pub port: i64,
    pub cloudflare_zone_id: String,
    pub cloudflare_record_name: String,
    pub ttl: i64,
    pub proxied: bool,
    pub auto_migrate: bool,
    pub publish_only_healthy: bool,
    pub min_nodes: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: serde_json::Value,
    pub actor: Option<String>,
}
