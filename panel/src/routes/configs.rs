//! Config-node assignment, endpoint-group, and manual DNS sync endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::dns::{self, DnsSyncReport};
use crate::error::CoreError;
use crate::migration;
use crate::models::{EndpointGroup, Node};
use crate::repo::endpoint_group_repo::{self, EndpointGroupUpdate, NewEndpointGroup};
use crate::repo::{audit_repo, config_node_repo};
use crate::state::AppState;

pub async fn list_config_nodes(
    State(state): State<AppState>,
    Path(cfg): Path<String>,
) -> Result<Json<Vec<Node>>, CoreError> {
    Ok(Json(config_node_repo::nodes_for_config(&state.db, &cfg)?))
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub node_id: String,
}

pub async fn assign_config_node(
    State(state): State<AppState>,
    Path(cfg): Path<String>,
    Json(body): Json<AssignBody>,
) -> Result<StatusCode, CoreError> {
    let created = config_node_repo::assign(&state.db, &cfg, &body.node_id)?;
    audit_repo::log(
        &state.db,
        "config_node_assigned",
        "config_node",
        Some(&body.node_id),
        &json!({ "config_name": cfg }),
        None,
    )?;
    Ok(if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    })
}

/// Hard-fails with `PEERS_ORPHANED` if the node still owns peers with no
/// migration destination; otherwise migrates every owned peer onto the
/// remaining assignees before dropping the assignment.
pub async fn unassign_config_node(
    State(state): State<AppState>,
    Path((cfg, node_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, CoreError> {
    migration::ensure_no_orphans(&state.db, &cfg, &node_id)?;
    let result = migration::migrate_node_peers(&state.db, &state.agents, &cfg, &node_id).await?;
    config_node_repo::unassign(&state.db, &cfg, &node_id)?;

    audit_repo::log(
        &state.db,
        "node_removed",
        "config_node",
        Some(&node_id),
        &json!({ "config_name": cfg, "peers_migrated": result.migrated_count }),
        None,
    )?;

    Ok(Json(json!({
        "peers_migrated": result.migrated_count,
        "total": result.total,
    })))
}

pub async fn get_endpoint_group(
    State(state): State<AppState>,
    Path(cfg): Path<String>,
) -> Result<Json<EndpointGroup>, CoreError> {
    let group = endpoint_group_repo::get_by_config_name(&state.db, &cfg)?
        .ok_or_else(|| CoreError::NotFound(format!("no endpoint group for config '{cfg}'")))?;
    Ok(Json(group))
}

#[derive(Debug, Deserialize)]
pub struct UpsertEndpointGroupBody {
    pub domain: String,
    pub port: i64,
    pub cloudflare_zone_id: String,
    pub cloudflare_record_name: String,
    #[serde(default = "default_ttl")]
    pub ttl: i64,
    #[serde(default = "default_true")]
    pub auto_migrate: bool,
    #[serde(default = "default_true")]
    pub publish_only_healthy: bool,
    #[serde(default = "default_min_nodes")]
    pub min_nodes: i64,
}

fn default_ttl() -> i64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_min_nodes() -> i64 {
    1
}

pub async fn upsert_endpoint_group(
    State(state): State<AppState>,
    Path(cfg): Path<String>,
    Json(body): Json<UpsertEndpointGroupBody>,
) -> Result<Json<EndpointGroup>, CoreError> {
    let group = if endpoint_group_repo::get_by_config_name(&state.db, &cfg)?.is_some() {
        endpoint_group_repo::update(
            &state.db,
            &cfg,
            EndpointGroupUpdate {
                domain: Some(body.domain),
                port: Some(body.port),
                ttl: Some(body.ttl),
                auto_migrate: Some(body.auto_migrate),
                publish_only_healthy: Some(body.publish_only_healthy),
                min_nodes: Some(body.min_nodes),
            },
        )?
    } else {
        endpoint_group_repo::create(
            &state.db,
            NewEndpointGroup {
                config_name: cfg.clone(),
                domain: body.domain,
                port: body.port,
                cloudflare_zone_id: body.cloudflare_zone_id,
                cloudflare_record_name: body.cloudflare_record_name,
                ttl: body.ttl,
                auto_migrate: body.auto_migrate,
                publish_only_healthy: body.publish_only_healthy,
                min_nodes: body.min_nodes,
            },
        )?
    };

    audit_repo::log(
        &state.db,
        "endpoint_group_upserted",
        "endpoint_group",
        Some(&cfg),
        &json!({ "domain": group.domain }),
        None,
    )?;
    Ok(Json(group))
}

/// Manual sync trigger: `on_background=false`, so a DNS-provider error
/// propagates straight to the caller rather than enqueuing a retry.
pub async fn sync_dns(
    State(state): State<AppState>,
    Path(cfg): Path<String>,
) -> Result<Json<DnsSyncReport>, CoreError> {
    let report = dns::sync_config_dns(&state.db, &state.dns_client, &state.dns_queue, &cfg, false).await?;
    Ok(Json(report))
}
