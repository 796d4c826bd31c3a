//! Drift detection/reconciliation endpoints (C7 surfaced through C11).

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::drift::{self, DriftReport, ReconcileOptions, ReconcileOutcome};
use crate::error::CoreError;
use crate::repo::{audit_repo, interface_repo, node_repo};
use crate::state::AppState;

async fn detect_for_node(state: &AppState, node_id: &str) -> Result<Option<DriftReport>, CoreError> {
    let node = node_repo::get_by_id(&state.db, node_id)?
        .ok_or_else(|| CoreError::NotFound(format!("node {node_id} not found")))?;
    let Some(iface) = interface_repo::list_for_node(&state.db, &node.id)?
        .into_iter()
        .find(|i| i.enabled)
    else {
        return Ok(None);
    };
    let client = state.agents.for_node(&node.agent_url, &node.shared_secret);
    let dump = client.dump(&iface.interface_name).await?;
    let report = drift::detect(&state.db, &node.id, &iface.interface_name, &dump.peers)?;
    Ok(Some(report))
}

pub async fn drift_all_nodes(State(state): State<AppState>) -> Result<Json<Vec<DriftReport>>, CoreError> {
    let nodes = node_repo::list_enabled(&state.db)?;
    let mut reports = Vec::with_capacity(nodes.len());
    for node in nodes {
        match detect_for_node(&state, &node.id).await {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(e) => warn!("drift detection failed for node {}: {e}", node.name),
        }
    }
    Ok(Json(reports))
}

pub async fn drift_one_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DriftReport>, CoreError> {
    let report = detect_for_node(&state, &id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("node {id} has no enabled interface")))?;
    Ok(Json(report))
}

pub async fn reconcile_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(opts): Json<ReconcileOptions>,
) -> Result<Json<ReconcileOutcome>, CoreError> {
    let node = node_repo::get_by_id(&state.db, &id)?
        .ok_or_else(|| CoreError::NotFound(format!("node {id} not found")))?;
    let iface = interface_repo::list_for_node(&state.db, &node.id)?
        .into_iter()
        .find(|i| i.enabled)
        .ok_or_else(|| CoreError::NotFound(format!("node {id} has no enabled interface")))?;
    let client = state.agents.for_node(&node.agent_url, &node.shared_secret);
    let dump = client.dump(&iface.interface_name).await?;
    let report = drift::detect(&state.db, &node.id, &iface.interface_name, &dump.peers)?;
    let outcome = drift::reconcile(&state.db, &client, &iface.interface_name, &report, &opts).await;

    audit_repo::log(
        &state.db,
        "drift_reconciled",
        "node",
        Some(&id),
        &json!({
            "added": outcome.added.len(),
            "updated": outcome.updated.len(),
            "removed": outcome.removed.len(),
            "errors": outcome.errors.len(),
        }),
        None,
    )?;

    Ok(Json(outcome))
}
