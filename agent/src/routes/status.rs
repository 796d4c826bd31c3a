use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::Json;
use sysinfo::{Disks, Networks, System};

use wgfleet_proto::wire::{InterfaceStatus, StatusResponse, SystemMetrics};

use crate::error::AgentFault;
use crate::state::AgentState;
use crate::wgctl;

/// A peer counts as active if its last handshake was within this window.
const ACTIVE_HANDSHAKE_WINDOW_SECS: u64 = 180;

pub async fn status(State(state): State<AgentState>) -> Result<Json<StatusResponse>, AgentFault> {
    let mut sys = System::new_all();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_percent = sys.global_cpu_usage();
    let memory_percent = if sys.total_memory() > 0 {
        (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
    } else {
        0.0
    };

    let disks = Disks::new_with_refreshed_list();
    let disk_percent = disk_usage_percent(&disks);

    let networks = Networks::new_with_refreshed_list();
    let (net_rx_bytes, net_tx_bytes) = networks.iter().fold((0u64, 0u64), |(rx, tx), (_, data)| {
        (rx + data.total_received(), tx + data.total_transmitted())
    });

    let mut interfaces = BTreeMap::new();
    let now = unix_now();
    for iface in wgctl::list_interfaces(&state.config) {
        let is_up = wgctl::is_up(&state.config, &iface);
        let dump = if is_up {
            wgctl::dump(&state.config, &iface).ok()
        } else {
            None
        };

        let (peer_count, active_peers, total_rx_bytes, total_tx_bytes) = match &dump {
            Some(d) => {
                let active = d
                    .peers
                    .iter()
                    .filter(|p| {
                        p.latest_handshake
                            .is_some_and(|hs| now.saturating_sub(hs) <= ACTIVE_HANDSHAKE_WINDOW_SECS)
                    })
                    .count();
                let rx = d.peers.iter().map(|p| p.transfer_rx).sum();
                let tx = d.peers.iter().map(|p| p.transfer_tx).sum();
                (d.peers.len(), active, rx, tx)
            }
            None => (0, 0, 0, 0),
        };

        interfaces.insert(
            iface,
            InterfaceStatus {
                status: if is_up { "up" } else { "down" },
                peer_count,
                active_peers,
                total_rx_bytes,
                total_tx_bytes,
            },
        );
    }

    Ok(Json(StatusResponse {
        system: SystemMetrics {
            cpu_percent,
            memory_percent,
            disk_percent,
            net_rx_bytes,
            net_tx_bytes,
        },
        interfaces,
    }))
}

fn disk_usage_percent(disks: &Disks) -> f32 {
    let (total, available) = disks.iter().fold((0u64, 0u64), |(t, a), disk| {
        (t + disk.total_space(), a + disk.available_space())
    });
    if total == 0 {
        0.0
    } else {
        ((total - available) as f32 / total as f32) * 100.0
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
