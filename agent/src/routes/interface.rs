use std::fs;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::warn;

use wgfleet_proto::wire::{
    EnableDisableResponse, InterfaceConfigRequest, InterfaceConfigResponse, SyncConfRequest,
};

use crate::config_file;
use crate::error::AgentFault;
use crate::state::AgentState;
use crate::wgctl;

pub async fn syncconf(
    State(state): State<AgentState>,
    Path(interface): Path<String>,
    Json(body): Json<SyncConfRequest>,
) -> Result<StatusCode, AgentFault> {
    let decoded = STANDARD
        .decode(&body.config)
        .map_err(|e| AgentFault::Validation(format!("invalid base64 config: {e}")))?;
    let text = String::from_utf8(decoded)
        .map_err(|e| AgentFault::Validation(format!("config is not valid utf-8: {e}")))?;

    wgctl::syncconf(&state.config, &interface, &text)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_config(
    State(state): State<AgentState>,
    Path(interface): Path<String>,
) -> Result<Json<InterfaceConfigResponse>, AgentFault> {
    let path = state.config.config_path(&interface);
    let raw = fs::read_to_string(&path)
        .map_err(|_| AgentFault::NotFound(format!("no config for interface {interface}")))?;
    let parsed = config_file::parse(&raw);

    Ok(Json(InterfaceConfigResponse {
        interface,
        parsed: parsed.interface,
        raw,
    }))
}

/// `PUT /v1/wg/{i}/config` — replaces `[Interface]` only. Existing `[Peer]`
/// blocks are preserved verbatim, the prior file is backed up, the new
/// config is dry-run validated, and on failure the backup is restored.
pub async fn put_config(
    State(state): State<AgentState>,
    Path(interface): Path<String>,
    Json(body): Json<InterfaceConfigRequest>,
) -> Result<StatusCode, AgentFault> {
    let path = state.config.config_path(&interface);
    let existing = fs::read_to_string(&path).unwrap_or_default();
    let peer_blocks = if existing.is_empty() {
        Vec::new()
    } else {
        config_file::parse(&existing).peer_blocks
    };

    let rendered = config_file::render(&body.interface, &peer_blocks);

    let backup_path = path.with_extension("conf.bak");
    if !existing.is_empty() {
        fs::write(&backup_path, &existing)
            .map_err(|e| AgentFault::Internal(format!("failed to back up config: {e}")))?;
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AgentFault::Internal(format!("failed to create config dir: {e}")))?;
    }

    let was_up = wgctl::is_up(&state.config, &interface);

    let result = (|| -> Result<(), AgentFault> {
        fs::write(&path, &rendered)
            .map_err(|e| AgentFault::Internal(format!("failed to write config: {e}")))?;
        dry_run_validate(&rendered)?;

        if was_up {
            wgctl::down(&state.config, &interface)?;
            wgctl::up(&state.config, &interface)?;
        }
        Ok(())
    })();

    if let Err(err) = result {
        warn!(interface, "config update failed, restoring backup: {err}");
        if !existing.is_empty() {
            let _ = fs::write(&path, &existing);
        }
        return Err(err);
    }

    if backup_path.exists() {
        let _ = fs::remove_file(&backup_path);
    }

    Ok(StatusCode::NO_CONTENT)
}

fn dry_run_validate(rendered: &str) -> Result<(), AgentFault> {
    if !rendered.contains("[Interface]") {
        return Err(AgentFault::Validation("missing [Interface] section".into()));
    }
    if !rendered.contains("PrivateKey") {
        return Err(AgentFault::Validation("missing PrivateKey".into()));
    }
    Ok(())
}

pub async fn enable(
    State(state): State<AgentState>,
    Path(interface): Path<String>,
) -> Result<Json<EnableDisableResponse>, AgentFault> {
    let was_down = !wgctl::is_up(&state.config, &interface);
    if was_down {
        wgctl::up(&state.config, &interface)?;
    }
    Ok(Json(EnableDisableResponse {
        was_down: Some(was_down),
        was_up: None,
    }))
}

pub async fn disable(
    State(state): State<AgentState>,
    Path(interface): Path<String>,
) -> Result<Json<EnableDisableResponse>, AgentFault> {
    let was_up = wgctl::is_up(&state.config, &interface);
    if was_up {
        wgctl::down(&state.config, &interface)?;
    }
    Ok(Json(EnableDisableResponse {
        was_down: None,
        was_up: Some(was_up),
    }))
}

pub async fn delete_interface(
    State(state): State<AgentState>,
    Path(interface): Path<String>,
) -> Result<StatusCode, AgentFault> {
    wgctl::delete_interface_file(&state.config, &interface)?;
    Ok(StatusCode::NO_CONTENT)
}
