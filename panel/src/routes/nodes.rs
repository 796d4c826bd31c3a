//! Node and interface inventory endpoints, plus connection-test and
//! per-node stats reads.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::CoreError;
use crate::models::{Node, NodeInterface};
use crate::repo::interface_repo::{self, InterfaceUpdate, NewInterface};
use crate::repo::ip_allocator;
use crate::repo::node_repo::{self, NewNode, NodeUpdate};
use crate::repo::{audit_repo, peer_repo};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ListNodesQuery {
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    include_interfaces: bool,
}

#[derive(Debug, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<Vec<NodeInterface>>,
}

fn to_view(state: &AppState, node: Node, include_interfaces: bool) -> Result<NodeView, CoreError> {
    let interfaces = if include_interfaces {
        Some(interface_repo::list_for_node(&state.db, &node.id)?)
    } else {
        None
    };
    Ok(NodeView { node, interfaces })
}

pub async fn list_nodes(
    State(state): State<AppState>,
    Query(q): Query<ListNodesQuery>,
) -> Result<Json<Vec<NodeView>>, CoreError> {
    let nodes = match &q.group_id {
        Some(g) => node_repo::list_by_group(&state.db, Some(g.as_str()), false)?,
        None => node_repo::list_all(&state.db)?,
    };
    let views = nodes
        .into_iter()
        .map(|n| to_view(&state, n, q.include_interfaces))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(views))
}

pub async fn list_enabled_nodes(
    State(state): State<AppState>,
    Query(q): Query<ListNodesQuery>,
) -> Result<Json<Vec<NodeView>>, CoreError> {
    let nodes = node_repo::list_enabled(&state.db)?;
    let views = nodes
        .into_iter()
        .map(|n| to_view(&state, n, q.include_interfaces))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(views))
}

pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ListNodesQuery>,
) -> Result<Json<NodeView>, CoreError> {
    let node = node_repo::get_by_id(&state.db, &id)?
        .ok_or_else(|| CoreError::NotFound(format!("node {id} not found")))?;
    Ok(Json(to_view(&state, node, q.include_interfaces)?))
}

#[derive(Debug, Deserialize)]
pub struct InterfaceBody {
    pub interface_name: String,
    pub endpoint: String,
    pub ip_pool_cidr: String,
    pub private_key: String,
    #[serde(default)]
    pub listen_port: Option<i64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub post_up: Option<String>,
    #[serde(default)]
    pub pre_down: Option<String>,
    #[serde(default)]
    pub mtu: Option<i64>,
    #[serde(default)]
    pub dns: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
}

fn default_weight() -> i64 {
    100
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateNodeBody {
    pub name: String,
    pub agent_url: String,
    pub shared_secret: String,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default)]
    pub max_peers: i64,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Back-compat single-interface shorthand alongside the general `interfaces[]`.
    #[serde(default)]
    pub wg_interface: Option<InterfaceBody>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceBody>,
}

pub async fn create_node(
    State(state): State<AppState>,
    Json(body): Json<CreateNodeBody>,
) -> Result<(StatusCode, Json<NodeView>), CoreError> {
    let node = node_repo::create(
        &state.db,
        NewNode {
            name: body.name,
            agent_url: body.agent_url,
            shared_secret: body.shared_secret,
            weight: body.weight,
            max_peers: body.max_peers,
            group_id: body.group_id,
            enabled: body.enabled,
        },
    )?;

    let mut interfaces = body.interfaces;
    if let Some(wg) = body.wg_interface {
        interfaces.push(wg);
    }
    for iface in interfaces {
        interface_repo::create(
            &state.db,
            NewInterface {
                node_id: node.id.clone(),
                interface_name: iface.interface_name,
                endpoint: iface.endpoint,
                ip_pool_cidr: iface.ip_pool_cidr,
                private_key: iface.private_key,
                listen_port: iface.listen_port,
                address: iface.address,
                post_up: iface.post_up,
                pre_down: iface.pre_down,
                mtu: iface.mtu,
                dns: iface.dns,
                table: iface.table,
            },
        )?;
    }

    audit_repo::log(
        &state.db,
        "node_created",
        "node",
        Some(&node.id),
        &json!({ "name": node.name }),
        None,
    )?;

    let view = to_view(&state, node, true)?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateNodeBody {
    pub name: Option<String>,
    pub agent_url: Option<String>,
    pub weight: Option<i64>,
    pub max_peers: Option<i64>,
    pub group_id: Option<Option<String>>,
    pub override_listen_port: Option<Option<i64>>,
    pub override_dns: Option<Option<String>>,
    pub override_mtu: Option<Option<i64>>,
    pub override_keepalive: Option<Option<i64>>,
    pub override_endpoint_allowed_ip: Option<Option<String>>,
    pub override_post_up: Option<Option<String>>,
    pub override_pre_down: Option<Option<String>>,
}

pub async fn update_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateNodeBody>,
) -> Result<Json<Node>, CoreError> {
    let node = node_repo::update(
        &state.db,
        &id,
        NodeUpdate {
            name: body.name,
            agent_url: body.agent_url,
            weight: body.weight,
            max_peers: body.max_peers,
            group_id: body.group_id,
            override_listen_port: body.override_listen_port,
            override_dns: body.override_dns,
            override_mtu: body.override_mtu,
            override_keepalive: body.override_keepalive,
            override_endpoint_allowed_ip: body.override_endpoint_allowed_ip,
            override_post_up: body.override_post_up,
            override_pre_down: body.override_pre_down,
        },
    )?;
    audit_repo::log(&state.db, "node_updated", "node", Some(&id), &json!({}), None)?;
    Ok(Json(node))
}

#[derive(Debug, Deserialize)]
pub struct ToggleBody {
    pub enabled: bool,
}

pub async fn toggle_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ToggleBody>,
) -> Result<Json<Node>, CoreError> {
    let node = node_repo::toggle_enabled(&state.db, &id, body.enabled)?;
    audit_repo::log(
        &state.db,
        "node_toggled",
        "node",
        Some(&id),
        &json!({ "enabled": body.enabled }),
        None,
    )?;
    Ok(Json(node))
}

pub async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, CoreError> {
    let owned = peer_repo::count_for_node(&state.db, &id)?;
    if owned > 0 {
        return Err(CoreError::PeersOrphaned(format!(
            "node {id} still owns {owned} peer(s); migrate or delete them first"
        )));
    }
    node_repo::delete(&state.db, &id)?;
    audit_repo::log(&state.db, "node_deleted", "node", Some(&id), &json!({}), None)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct TestResult {
    pub ok: bool,
    pub message: String,
}

pub async fn test_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TestResult>, CoreError> {
    let node = node_repo::get_by_id(&state.db, &id)?
        .ok_or_else(|| CoreError::NotFound(format!("node {id} not found")))?;
    let client = state.agents.for_node(&node.agent_url, &node.shared_secret);
    let result = match client.health().await {
        Ok(_) => TestResult {
            ok: true,
            message: "Connection successful".into(),
        },
        Err(e) => TestResult {
            ok: false,
            message: format!("Connection failed: {e}"),
        },
    };
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
pub struct NodeIpStats {
    pub total_ips: usize,
    pub allocated_ips: usize,
    pub available_ips: usize,
}

pub async fn node_ip_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NodeIpStats>, CoreError> {
    let iface = interface_repo::list_for_node(&state.db, &id)?
        .into_iter()
        .find(|i| i.enabled)
        .ok_or_else(|| CoreError::NotFound(format!("node {id} has no enabled interface")))?;
    let (used, total) = ip_allocator::pool_stats(&state.db, &id, &iface.ip_pool_cidr)?;
    Ok(Json(NodeIpStats {
        total_ips: total,
        allocated_ips: used,
        available_ips: total.saturating_sub(used),
    }))
}

pub async fn list_interfaces(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<NodeInterface>>, CoreError> {
    Ok(Json(interface_repo::list_for_node(&state.db, &id)?))
}

pub async fn create_interface(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<InterfaceBody>,
) -> Result<(StatusCode, Json<NodeInterface>), CoreError> {
    let iface = interface_repo::create(
        &state.db,
        NewInterface {
            node_id: id.clone(),
            interface_name: body.interface_name,
            endpoint: body.endpoint,
            ip_pool_cidr: body.ip_pool_cidr,
            private_key: body.private_key,
            listen_port: body.listen_port,
            address: body.address,
            post_up: body.post_up,
            pre_down: body.pre_down,
            mtu: body.mtu,
            dns: body.dns,
            table: body.table,
        },
    )?;
    audit_repo::log(
        &state.db,
        "interface_created",
        "node_interface",
        Some(&iface.id),
        &json!({ "node_id": id }),
        None,
    )?;
    Ok((StatusCode::CREATED, Json(iface)))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateInterfaceBody {
    pub endpoint: Option<String>,
    pub ip_pool_cidr: Option<String>,
    pub listen_port: Option<Option<i64>>,
    pub address: Option<Option<String>>,
    pub post_up: Option<Option<String>>,
    pub pre_down: Option<Option<String>>,
    pub mtu: Option<Option<i64>>,
    pub dns: Option<Option<String>>,
    pub table: Option<Option<String>>,
    pub enabled: Option<bool>,
}

pub async fn update_interface(
    State(state): State<AppState>,
    Path((_id, iface_id)): Path<(String, String)>,
    Json(body): Json<UpdateInterfaceBody>,
) -> Result<Json<NodeInterface>, CoreError> {
    let iface = interface_repo::update(
        &state.db,
        &iface_id,
        InterfaceUpdate {
            endpoint: body.endpoint,
            ip_pool_cidr: body.ip_pool_cidr,
            listen_port: body.listen_port,
            address: body.address,
            post_up: body.post_up,
            pre_down: body.pre_down,
            mtu: body.mtu,
            dns: body.dns,
            table: body.table,
            enabled: body.enabled,
        },
    )?;
    Ok(Json(iface))
}

pub async fn delete_interface(
    State(state): State<AppState>,
    Path((_id, iface_id)): Path<(String, String)>,
) -> Result<StatusCode, CoreError> {
    interface_repo::delete(&state.db, &iface_id)?;
    Ok(StatusCode::NO_CONTENT)
}
