//! `wg`/`wg-quick` process control: per-peer subcommands and config
//! persistence.

use std::fs;
use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;
use tracing::{info, warn};
use wgfleet_proto::wire::{AddPeerRequest, UpdatePeerRequest, WgDumpPeer, WgDumpResponse};

use crate::config::AgentConfig;
use crate::config_file;
use crate::error::AgentFault;

fn run(bin: &str, args: &[&str]) -> Result<String, AgentFault> {
    let output = Command::new(bin)
        .args(args)
        .output()
        .map_err(|e| AgentFault::ToolFailure(format!("failed to spawn {bin}: {e}")))?;

    if !output.status.success() {
        return Err(AgentFault::ToolFailure(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Discovers known interfaces from the `.conf` files in the config dir,
/// since the Agent keeps no other local record of them.
pub fn list_interfaces(cfg: &AgentConfig) -> Vec<String> {
    let Ok(entries) = fs::read_dir(&cfg.config_dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            if path.extension().and_then(|s| s.to_str()) == Some("conf") {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.to_string())
            } else {
                None
            }
        })
        .collect()
}

/// `wg show <iface> interfaces` lists the currently-up interfaces.
pub fn is_up(cfg: &AgentConfig, interface: &str) -> bool {
    Command::new(&cfg.wg_bin)
        .args(["show", "interfaces"])
        .output()
        .ok()
        .map(|out| {
            String::from_utf8_lossy(&out.stdout)
                .split_whitespace()
                .any(|i| i == interface)
        })
        .unwrap_or(false)
}

pub fn up(cfg: &AgentConfig, interface: &str) -> Result<(), AgentFault> {
    run(&cfg.wg_quick_bin, &["up", interface])?;
    info!(interface, "interface brought up");
    Ok(())
}

pub fn down(cfg: &AgentConfig, interface: &str) -> Result<(), AgentFault> {
    run(&cfg.wg_quick_bin, &["down", interface])?;
    info!(interface, "interface brought down");
    Ok(())
}

/// Runs `wg show <iface> dump` and parses the tab-separated output into
/// typed peer rows. See `wg`(8) for the exact column layout.
pub fn dump(cfg: &AgentConfig, interface: &str) -> Result<WgDumpResponse, AgentFault> {
    let out = run(&cfg.wg_bin, &["show", interface, "dump"])?;
    Ok(parse_dump_output(&out, interface))
}

fn parse_dump_output(out: &str, interface: &str) -> WgDumpResponse {
    let mut lines = out.lines();

    // First line: private_key, public_key, listen_port, fwmark (interface itself).
    let _interface_line = lines.next();

    let mut peers = Vec::new();
    for line in lines {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 8 {
            continue;
        }
        let public_key = cols[0].to_string();
        let preshared_key = none_if_dash(cols[1]);
        let endpoint = none_if_dash(cols[2]);
        let allowed_ips = if cols[3] == "(none)" || cols[3].is_empty() {
            Vec::new()
        } else {
            cols[3].split(',').map(|s| s.to_string()).collect()
        };
        let latest_handshake = cols[4].parse::<u64>().ok().filter(|&v| v != 0);
        let transfer_rx = cols[5].parse().unwrap_or(0);
        let transfer_tx = cols[6].parse().unwrap_or(0);
        let persistent_keepalive = cols[7].parse().unwrap_or(0);

        peers.push(WgDumpPeer {
            public_key,
            preshared_key,
            endpoint,
            allowed_ips,
            latest_handshake,
            transfer_rx,
            transfer_tx,
            persistent_keepalive,
        });
    }

    WgDumpResponse {
        interface: interface.to_string(),
        peers,
    }
}

fn none_if_dash(s: &str) -> Option<String> {
    if s == "(none)" || s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Adds a peer. The preshared key, if any, is written to a scoped temp
/// file that is removed on every exit path (the `NamedTempFile` guard
/// drops it whether `wg set` succeeds or fails).
pub fn add_peer(
    cfg: &AgentConfig,
    interface: &str,
    req: &AddPeerRequest,
) -> Result<(), AgentFault> {
    let allowed_ips = req.allowed_ips.join(",");
    let mut args = vec![
        "set".to_string(),
        interface.to_string(),
        "peer".to_string(),
        req.public_key.clone(),
        "allowed-ips".to_string(),
        allowed_ips,
        "persistent-keepalive".to_string(),
        req.persistent_keepalive.to_string(),
    ];

    let _psk_guard = if let Some(psk) = &req.preshared_key {
        let mut file = NamedTempFile::new()
            .map_err(|e| AgentFault::Internal(format!("failed to create psk temp file: {e}")))?;
        file.write_all(psk.as_bytes())
            .map_err(|e| AgentFault::Internal(format!("failed to write psk temp file: {e}")))?;
        args.push("preshared-key".to_string());
        args.push(file.path().display().to_string());
        Some(file)
    } else {
        None
    };

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run(&cfg.wg_bin, &arg_refs)?;

    persist_running_config(cfg, interface)?;
    info!(interface, public_key = %req.public_key, "peer added");
    Ok(())
}

pub fn update_peer(
    cfg: &AgentConfig,
    interface: &str,
    public_key: &str,
    req: &UpdatePeerRequest,
) -> Result<(), AgentFault> {
    let mut args = vec![
        "set".to_string(),
        interface.to_string(),
        "peer".to_string(),
        public_key.to_string(),
    ];

    if let Some(ips) = &req.allowed_ips {
        args.push("allowed-ips".to_string());
        args.push(ips.join(","));
    }
    if let Some(keepalive) = req.persistent_keepalive {
        args.push("persistent-keepalive".to_string());
        args.push(keepalive.to_string());
    }

    if args.len() == 3 {
        return Err(AgentFault::Validation(
            "update requires at least one field".into(),
        ));
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run(&cfg.wg_bin, &arg_refs)?;
    persist_running_config(cfg, interface)?;
    info!(interface, public_key, "peer updated");
    Ok(())
}

pub fn delete_peer(cfg: &AgentConfig, interface: &str, public_key: &str) -> Result<(), AgentFault> {
    run(
        &cfg.wg_bin,
        &["set", interface, "peer", public_key, "remove"],
    )?;
    persist_running_config(cfg, interface)?;
    info!(interface, public_key, "peer removed");
    Ok(())
}

/// Atomically replaces the live peer set. The decoded config is written to
/// a scoped temp file removed on every exit path; on any failure the temp
/// file is gone and the call surfaces as 500, per spec.
pub fn syncconf(cfg: &AgentConfig, interface: &str, config_text: &str) -> Result<(), AgentFault> {
    let mut file = NamedTempFile::new()
        .map_err(|e| AgentFault::Internal(format!("failed to create syncconf temp file: {e}")))?;
    file.write_all(config_text.as_bytes())
        .map_err(|e| AgentFault::Internal(format!("failed to write syncconf temp file: {e}")))?;

    run(
        &cfg.wg_bin,
        &["syncconf", interface, &file.path().display().to_string()],
    )?;

    persist_running_config(cfg, interface)?;
    info!(interface, "syncconf applied");
    Ok(())
}

/// `wg showconf` reflects only `[Interface]`+`[Peer]` runtime state, not
/// PostUp/PreDown/DNS/Table. We fold it back over the on-disk config so
/// those directives survive a peer mutation.
fn persist_running_config(cfg: &AgentConfig, interface: &str) -> Result<(), AgentFault> {
    let live = run(&cfg.wg_bin, &["showconf", interface])?;
    let live_parsed = config_file::parse(&live);

    let path = cfg.config_path(interface);
    let on_disk = fs::read_to_string(&path).unwrap_or_default();
    let mut merged_interface = if on_disk.is_empty() {
        live_parsed.interface.clone()
    } else {
        config_file::parse(&on_disk).interface
    };
    merged_interface.private_key = live_parsed.interface.private_key;
    merged_interface.listen_port = live_parsed.interface.listen_port.or(merged_interface.listen_port);

    let rendered = config_file::render(&merged_interface, &live_parsed.peer_blocks);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AgentFault::Internal(format!("failed to create config dir: {e}")))?;
    }
    fs::write(&path, rendered)
        .map_err(|e| AgentFault::Internal(format!("failed to persist config: {e}")))?;

    Ok(())
}

pub fn delete_interface_file(cfg: &AgentConfig, interface: &str) -> Result<(), AgentFault> {
    if is_up(cfg, interface) {
        down(cfg, interface)?;
    }
    let path = cfg.config_path(interface);
    if path.exists() {
        fs::remove_file(&path)
            .map_err(|e| AgentFault::Internal(format!("failed to remove config file: {e}")))?;
    }
    warn!(interface, "interface deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP_SAMPLE: &str = "privkeyhash\tpubkeyhash\t51820\toff\npeerkey1\t(none)\t203.0.113.5:51820\t10.0.0.2/32\t1700000000\t1024\t2048\t25\npeerkey2\t(none)\t(none)\t10.0.0.3/32\t0\t0\t0\t0\n";

    #[test]
    fn parses_dump_peers() {
        let result = parse_dump_output(DUMP_SAMPLE, "wg0");
        assert_eq!(result.interface, "wg0");
        assert_eq!(result.peers.len(), 2);
        assert_eq!(result.peers[0].public_key, "peerkey1");
        assert_eq!(result.peers[0].allowed_ips, vec!["10.0.0.2/32"]);
        assert_eq!(result.peers[0].transfer_rx, 1024);
        assert_eq!(result.peers[0].latest_handshake, Some(1_700_000_000));
    }

    #[test]
    fn zero_handshake_is_none() {
        let result = parse_dump_output(DUMP_SAMPLE, "wg0");
        assert_eq!(result.peers[1].latest_handshake, None);
        assert_eq!(result.peers[1].endpoint, None);
    }

    #[test]
    fn skips_malformed_lines() {
        let result = parse_dump_output("header\nshortline\tonly\n", "wg0");
        assert!(result.peers.is_empty());
    }
}
