use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use wgfleet_proto::wire::{AddPeerRequest, UpdatePeerRequest, WgDumpResponse};

use crate::error::AgentFault;
use crate::state::AgentState;
use crate::wgctl;

pub async fn dump(
    State(state): State<AgentState>,
    Path(interface): Path<String>,
) -> Result<Json<WgDumpResponse>, AgentFault> {
    Ok(Json(wgctl::dump(&state.config, &interface)?))
}

pub async fn add_peer(
    State(state): State<AgentState>,
    Path(interface): Path<String>,
    Json(body): Json<AddPeerRequest>,
) -> Result<StatusCode, AgentFault> {
    if body.public_key.is_empty() {
        return Err(AgentFault::Validation("public_key is required".into()));
    }
    if body.allowed_ips.is_empty() {
        return Err(AgentFault::Validation("allowed_ips must not be empty".into()));
    }
    wgctl::add_peer(&state.config, &interface, &body)?;
    Ok(StatusCode::CREATED)
}

pub async fn update_peer(
    State(state): State<AgentState>,
    Path((interface, public_key)): Path<(String, String)>,
    Json(body): Json<UpdatePeerRequest>,
) -> Result<StatusCode, AgentFault> {
    wgctl::update_peer(&state.config, &interface, &public_key, &body)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_peer(
    State(state): State<AgentState>,
    Path((interface, public_key)): Path<(String, String)>,
) -> Result<StatusCode, AgentFault> {
    wgctl::delete_peer(&state.config, &interface, &public_key)?;
    Ok(StatusCode::NO_CONTENT)
}
