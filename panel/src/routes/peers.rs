//! Peer lifecycle endpoints: add/delete/restrict/allow-access/update, and
//! the bulk-add variant.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::CoreError;
use crate::keygen;
use crate::models::Peer;
use crate::placement::{self, Strategy};
use crate::repo::ip_allocator;
use crate::repo::peer_repo::{self, NewPeer, PeerUpdate};
use crate::repo::{audit_repo, interface_repo, node_repo};
use crate::state::AppState;
use wgfleet_proto::wire::{AddPeerRequest, UpdatePeerRequest};

pub async fn list_config_peers(
    State(state): State<AppState>,
    Path(cfg): Path<String>,
) -> Result<Json<Vec<Peer>>, CoreError> {
    Ok(Json(peer_repo::list_for_config(&state.db, &cfg)?))
}

#[derive(Debug, Deserialize)]
pub struct AddPeersBody {
    /// `"auto"` or a specific node id, per the placement selector's strategy input.
    #[serde(default = "default_selection")]
    pub node_selection: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub generate_preshared_key: bool,
    #[serde(default)]
    pub persistent_keepalive: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// How many peers to add in this call (bulk-add); each gets its own keypair.
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_selection() -> String {
    "auto".into()
}

fn default_count() -> usize {
    1
}

#[derive(Debug, Serialize)]
pub struct AddedPeer {
    pub peer: Peer,
    /// Returned once — the Panel does not persist generated private keys.
    pub private_key: Option<String>,
    pub preshared_key: Option<String>,
}

fn strategy_from(selection: &str) -> Strategy {
    if selection.eq_ignore_ascii_case("auto") {
        Strategy::Auto
    } else {
        Strategy::Specific(selection.to_string())
    }
}

/// Adds one or more peers to `cfg`. Per peer: pick a node, create a
/// provisional DB row (satisfying the `ip_allocations.peer_id` foreign key),
/// allocate an IP against that row, push to the Agent, and roll the row back
/// on any failure along the way — no DB row survives unless the Agent
/// accepted the peer, while the schema still requires the row to exist
/// before its IP allocation can reference it.
pub async fn add_peers(
    State(state): State<AppState>,
    Path(cfg): Path<String>,
    Json(body): Json<AddPeersBody>,
) -> Result<(StatusCode, Json<Vec<AddedPeer>>), CoreError> {
    if body.count == 0 {
        return Err(CoreError::Validation("count must be at least 1".into()));
    }
    if body.count > 1 && body.public_key.is_some() {
        return Err(CoreError::Validation(
            "public_key cannot be fixed when adding more than one peer".into(),
        ));
    }

    let mut added = Vec::with_capacity(body.count);
    for _ in 0..body.count {
        added.push(add_one_peer(&state, &cfg, &body).await?);
    }

    Ok((StatusCode::CREATED, Json(added)))
}

async fn add_one_peer(
    state: &AppState,
    cfg: &str,
    body: &AddPeersBody,
) -> Result<AddedPeer, CoreError> {
    let node = placement::select_node(
        &state.db,
        cfg,
        strategy_from(&body.node_selection),
        body.group_id.as_deref(),
    )?;
    let iface = interface_repo::list_for_node(&state.db, &node.id)?
        .into_iter()
        .find(|i| i.enabled)
        .ok_or_else(|| CoreError::Validation(format!("node {} has no enabled interface", node.name)))?;

    let (private_key, public_key) = match &body.public_key {
        Some(pk) => (None, pk.clone()),
        None => {
            let kp = keygen::generate();
            (Some(kp.private_key), kp.public_key)
        }
    };
    let preshared_key = body.generate_preshared_key.then(keygen::generate_preshared_key);

    let peer = peer_repo::create(
        &state.db,
        NewPeer {
            node_id: node.id.clone(),
            interface_name: iface.interface_name.clone(),
            config_name: cfg.to_string(),
            public_key: public_key.clone(),
            allowed_ips: Vec::new(),
            preshared_key: preshared_key.clone(),
            persistent_keepalive: body.persistent_keepalive,
            name: body.name.clone(),
        },
    )?;

    let result = add_one_peer_inner(state, &node.agent_url, &node.shared_secret, &iface.interface_name, &iface.ip_pool_cidr, &node.id, &peer, &preshared_key, body.persistent_keepalive)
        .await;

    match result {
        Ok(peer) => {
            audit_repo::log(
                &state.db,
                "peer_added",
                "peer",
                Some(&peer.id),
                &json!({ "config_name": cfg, "node_id": node.id, "public_key": peer.public_key }),
                None,
            )?;
            Ok(AddedPeer {
                peer,
                private_key,
                preshared_key,
            })
        }
        Err(e) => {
            let _ = peer_repo::delete(&state.db, &peer.id);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn add_one_peer_inner(
    state: &AppState,
    agent_url: &str,
    shared_secret: &str,
    interface_name: &str,
    ip_pool_cidr: &str,
    node_id: &str,
    peer: &Peer,
    preshared_key: &Option<String>,
    persistent_keepalive: i64,
) -> Result<Peer, CoreError> {
    let ip = ip_allocator::allocate(&state.db, node_id, &peer.id, ip_pool_cidr)?;
    let allowed_ips = vec![format!("{ip}/32")];

    let client = state.agents.for_node(agent_url, shared_secret);
    let add_req = AddPeerRequest {
        public_key: peer.public_key.clone(),
        allowed_ips: allowed_ips.clone(),
        preshared_key: preshared_key.clone(),
        persistent_keepalive: persistent_keepalive as u32,
    };
    client.add_peer(interface_name, &add_req).await?;

    peer_repo::update(
        &state.db,
        &peer.id,
        PeerUpdate {
            allowed_ips: Some(allowed_ips),
            persistent_keepalive: None,
            name: None,
        },
    )
}

#[derive(Debug, Deserialize)]
pub struct DeletePeersBody {
    pub peers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletePeerStatus {
    pub public_key: String,
    pub deleted: bool,
    pub error: Option<String>,
}

/// Best-effort bulk delete: the Agent call, IP release, and DB delete each
/// proceed per peer; one failure doesn't block the rest of the batch.
pub async fn delete_peers(
    State(state): State<AppState>,
    Path(cfg): Path<String>,
    Json(body): Json<DeletePeersBody>,
) -> Result<Json<Vec<DeletePeerStatus>>, CoreError> {
    let mut statuses = Vec::with_capacity(body.peers.len());
    for public_key in body.peers {
        let status = delete_one_peer(&state, &cfg, &public_key).await;
        statuses.push(status);
    }
    Ok(Json(statuses))
}

async fn delete_one_peer(state: &AppState, cfg: &str, public_key: &str) -> DeletePeerStatus {
    match delete_one_peer_inner(state, cfg, public_key).await {
        Ok(()) => DeletePeerStatus {
            public_key: public_key.to_string(),
            deleted: true,
            error: None,
        },
        Err(e) => DeletePeerStatus {
            public_key: public_key.to_string(),
            deleted: false,
            error: Some(e.to_string()),
        },
    }
}

async fn delete_one_peer_inner(state: &AppState, cfg: &str, public_key: &str) -> Result<(), CoreError> {
    let peer = peer_repo::get_by_public_key(&state.db, public_key)?
        .filter(|p| p.config_name == cfg)
        .ok_or_else(|| CoreError::NotFound(format!("peer {public_key} not found in config '{cfg}'")))?;
    let node = node_repo::get_by_id(&state.db, &peer.node_id)?
        .ok_or_else(|| CoreError::NotFound(format!("node {} not found", peer.node_id)))?;

    let client = state.agents.for_node(&node.agent_url, &node.shared_secret);
    client.delete_peer(&peer.interface_name, &peer.public_key).await?;

    ip_allocator::release(&state.db, &peer.id)?;
    peer_repo::delete(&state.db, &peer.id)?;
    audit_repo::log(
        &state.db,
        "peer_deleted",
        "peer",
        Some(&peer.id),
        &json!({ "config_name": cfg, "public_key": peer.public_key }),
        None,
    )?;
    Ok(())
}

pub async fn delete_peer(
    State(state): State<AppState>,
    Path((cfg, peer_id)): Path<(String, String)>,
) -> Result<StatusCode, CoreError> {
    let peer = peer_repo::get_by_id(&state.db, &peer_id)?
        .filter(|p| p.config_name == cfg)
        .ok_or_else(|| CoreError::NotFound(format!("peer {peer_id} not found in config '{cfg}'")))?;
    delete_one_peer_inner(&state, &cfg, &peer.public_key).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RestrictPeersBody {
    pub peers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RestrictStatus {
    pub public_key: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// Restrict = remove the peer from the live Agent while keeping its DB row
/// and IP allocation, so `allow_access_peers` can restore it without a fresh
/// IP draw.
pub async fn restrict_peers(
    State(state): State<AppState>,
    Path(cfg): Path<String>,
    Json(body): Json<RestrictPeersBody>,
) -> Result<Json<Vec<RestrictStatus>>, CoreError> {
    let mut statuses = Vec::with_capacity(body.peers.len());
    for public_key in body.peers {
        let result = restrict_one(&state, &cfg, &public_key).await;
        statuses.push(to_status(public_key, result));
    }
    Ok(Json(statuses))
}

async fn restrict_one(state: &AppState, cfg: &str, public_key: &str) -> Result<(), CoreError> {
    let peer = peer_repo::get_by_public_key(&state.db, public_key)?
        .filter(|p| p.config_name == cfg)
        .ok_or_else(|| CoreError::NotFound(format!("peer {public_key} not found in config '{cfg}'")))?;
    let node = node_repo::get_by_id(&state.db, &peer.node_id)?
        .ok_or_else(|| CoreError::NotFound(format!("node {} not found", peer.node_id)))?;
    let client = state.agents.for_node(&node.agent_url, &node.shared_secret);
    client.delete_peer(&peer.interface_name, &peer.public_key).await?;
    audit_repo::log(
        &state.db,
        "peer_restricted",
        "peer",
        Some(&peer.id),
        &json!({ "config_name": cfg }),
        None,
    )?;
    Ok(())
}

pub async fn allow_access_peers(
    State(state): State<AppState>,
    Path(cfg): Path<String>,
    Json(body): Json<RestrictPeersBody>,
) -> Result<Json<Vec<RestrictStatus>>, CoreError> {
    let mut statuses = Vec::with_capacity(body.peers.len());
    for public_key in body.peers {
        let result = allow_one(&state, &cfg, &public_key).await;
        statuses.push(to_status(public_key, result));
    }
    Ok(Json(statuses))
}

async fn allow_one(state: &AppState, cfg: &str, public_key: &str) -> Result<(), CoreError> {
    let peer = peer_repo::get_by_public_key(&state.db, public_key)?
        .filter(|p| p.config_name == cfg)
        .ok_or_else(|| CoreError::NotFound(format!("peer {public_key} not found in config '{cfg}'")))?;
    let node = node_repo::get_by_id(&state.db, &peer.node_id)?
        .ok_or_else(|| CoreError::NotFound(format!("node {} not found", peer.node_id)))?;
    let client = state.agents.for_node(&node.agent_url, &node.shared_secret);
    let add_req = AddPeerRequest {
        public_key: peer.public_key.clone(),
        allowed_ips: peer.allowed_ips.clone(),
        preshared_key: peer.preshared_key.clone(),
        persistent_keepalive: peer.persistent_keepalive as u32,
    };
    client.add_peer(&peer.interface_name, &add_req).await?;
    audit_repo::log(
        &state.db,
        "peer_access_allowed",
        "peer",
        Some(&peer.id),
        &json!({ "config_name": cfg }),
        None,
    )?;
    Ok(())
}

fn to_status(public_key: String, result: Result<(), CoreError>) -> RestrictStatus {
    match result {
        Ok(()) => RestrictStatus {
            public_key,
            ok: true,
            error: None,
        },
        Err(e) => RestrictStatus {
            public_key,
            ok: false,
            error: Some(e.to_string()),
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePeerBody {
    #[serde(default)]
    pub allowed_ips: Option<Vec<String>>,
    #[serde(default)]
    pub persistent_keepalive: Option<i64>,
    #[serde(default)]
    pub name: Option<Option<String>>,
}

/// Pushes to the Agent first; the DB only commits the new fields once the
/// Agent confirms, so a failed push never leaves the Panel's view of a peer
/// ahead of what's actually configured on the node.
pub async fn update_peer(
    State(state): State<AppState>,
    Path((cfg, peer_id)): Path<(String, String)>,
    Json(body): Json<UpdatePeerBody>,
) -> Result<Json<Peer>, CoreError> {
    let peer = peer_repo::get_by_id(&state.db, &peer_id)?
        .filter(|p| p.config_name == cfg)
        .ok_or_else(|| CoreError::NotFound(format!("peer {peer_id} not found in config '{cfg}'")))?;
    let node = node_repo::get_by_id(&state.db, &peer.node_id)?
        .ok_or_else(|| CoreError::NotFound(format!("node {} not found", peer.node_id)))?;

    let client = state.agents.for_node(&node.agent_url, &node.shared_secret);
    let req = UpdatePeerRequest {
        allowed_ips: body.allowed_ips.clone(),
        persistent_keepalive: body.persistent_keepalive.map(|v| v as u32),
    };
    client.update_peer(&peer.interface_name, &peer.public_key, &req).await?;

    let updated = peer_repo::update(
        &state.db,
        &peer.id,
        PeerUpdate {
            allowed_ips: body.allowed_ips,
            persistent_keepalive: body.persistent_keepalive,
            name: body.name,
        },
    )?;
    audit_repo::log(
        &state.db,
        "peer_updated",
        "peer",
        Some(&peer.id),
        &json!({ "config_name": cfg }),
        None,
    )?;
    Ok(Json(updated))
}
