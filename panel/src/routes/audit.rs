//! Audit log query endpoint (C10 surfaced through C11).

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::CoreError;
use crate::models::AuditLogEntry;
use crate::repo::audit_repo::{self, AuditQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn query_audit_log(
    State(state): State<AppState>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<Vec<AuditLogEntry>>, CoreError> {
    let entries = audit_repo::query(
        &state.db,
        AuditQuery {
            entity_type: params.entity_type.as_deref(),
            entity_id: params.entity_id.as_deref(),
            limit: params.limit,
            offset: params.offset,
        },
    )?;
    Ok(Json(entries))
}
