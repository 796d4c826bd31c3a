//! JSON bodies exchanged on the Panel<->Agent wire.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            error: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceStatus {
    pub status: &'static str,
    pub peer_count: usize,
    pub active_peers: usize,
    pub total_rx_bytes: u64,
    pub total_tx_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub system: SystemMetrics,
    pub interfaces: std::collections::BTreeMap<String, InterfaceStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WgDumpPeer {
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_handshake: Option<u64>,
    #[serde(default)]
    pub transfer_rx: u64,
    #[serde(default)]
    pub transfer_tx: u64,
    #[serde(default)]
    pub persistent_keepalive: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WgDumpResponse {
    pub interface: String,
    pub peers: Vec<WgDumpPeer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPeerRequest {
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
    #[serde(default)]
    pub persistent_keepalive: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePeerRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfRequest {
    /// Base64-encoded `wg-quick`-style config text.
    pub config: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub private_key: String,
    pub listen_port: Option<u16>,
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_up: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_down: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfigResponse {
    pub interface: String,
    pub parsed: InterfaceConfig,
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfigRequest {
    #[serde(flatten)]
    pub interface: InterfaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnableDisableResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_down: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_up: Option<bool>,
}
