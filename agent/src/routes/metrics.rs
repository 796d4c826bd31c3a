use std::fmt::Write as _;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use sysinfo::System;

use crate::state::AgentState;
use crate::wgctl;

/// `GET /v1/metrics` — Prometheus text exposition, unauthenticated so
/// scrapers don't need the shared secret.
pub async fn metrics(State(state): State<AgentState>) -> Response {
    let mut sys = System::new_all();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let mut out = String::new();

    let _ = writeln!(out, "# HELP wgfleet_agent_cpu_percent Host CPU utilization.");
    let _ = writeln!(out, "# TYPE wgfleet_agent_cpu_percent gauge");
    let _ = writeln!(out, "wgfleet_agent_cpu_percent {}", sys.global_cpu_usage());

    let mem_percent = if sys.total_memory() > 0 {
        (sys.used_memory() as f64 / sys.total_memory() as f64) * 100.0
    } else {
        0.0
    };
    let _ = writeln!(out, "# HELP wgfleet_agent_memory_percent Host memory utilization.");
    let _ = writeln!(out, "# TYPE wgfleet_agent_memory_percent gauge");
    let _ = writeln!(out, "wgfleet_agent_memory_percent {mem_percent}");

    let _ = writeln!(out, "# HELP wgfleet_peer_receive_bytes_total Bytes received from a peer.");
    let _ = writeln!(out, "# TYPE wgfleet_peer_receive_bytes_total counter");
    let _ = writeln!(out, "# HELP wgfleet_peer_transmit_bytes_total Bytes transmitted to a peer.");
    let _ = writeln!(out, "# TYPE wgfleet_peer_transmit_bytes_total counter");
    let _ = writeln!(out, "# HELP wgfleet_peer_last_handshake_seconds Unix time of the last handshake.");
    let _ = writeln!(out, "# TYPE wgfleet_peer_last_handshake_seconds gauge");

    for iface in wgctl::list_interfaces(&state.config) {
        if !wgctl::is_up(&state.config, &iface) {
            continue;
        }
        let Ok(dump) = wgctl::dump(&state.config, &iface) else {
            continue;
        };

        let _ = writeln!(
            out,
            "# HELP wgfleet_interface_peer_count Peers configured on an interface."
        );
        let _ = writeln!(out, "# TYPE wgfleet_interface_peer_count gauge");
        let _ = writeln!(
            out,
            "wgfleet_interface_peer_count{{interface=\"{iface}\"}} {}",
            dump.peers.len()
        );

        for peer in &dump.peers {
            let pk = &peer.public_key;
            let _ = writeln!(
                out,
                "wgfleet_peer_receive_bytes_total{{interface=\"{iface}\",public_key=\"{pk}\"}} {}",
                peer.transfer_rx
            );
            let _ = writeln!(
                out,
                "wgfleet_peer_transmit_bytes_total{{interface=\"{iface}\",public_key=\"{pk}\"}} {}",
                peer.transfer_tx
            );
            if let Some(hs) = peer.latest_handshake {
                let _ = writeln!(
                    out,
                    "wgfleet_peer_last_handshake_seconds{{interface=\"{iface}\",public_key=\"{pk}\"}} {hs}"
                );
            }
        }
    }

    ([("content-type", "text/plain; version=0.0.4")], out).into_response()
}
