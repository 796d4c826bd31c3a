use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Stable error kinds, each mapped to an HTTP status code. `CoreError`
/// implements axum's `IntoResponse` directly since it crosses the HTTP
/// boundary as `{"error": "KIND: detail"}`-shaped JSON.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("unauthorized")]
    AuthFailed,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("ip pool exhausted")]
    IpPoolExhausted,
    #[error("ip pool contended, retry")]
    IpPoolContended,
    #[error("node at capacity")]
    NodeAtCapacity,
    #[error("no nodes configured")]
    NoNodesConfigured,
    #[error("peers orphaned: {0}")]
    PeersOrphaned(String),
    #[error("agent unreachable: {0}")]
    AgentUnreachable(String),
    #[error("agent error: {0}")]
    AgentError(String),
    #[error("dns provider error: {0}")]
    DnsProviderError(String),
    #[error("drift reconcile partial")]
    DriftReconcilePartial,
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION",
            CoreError::AuthFailed => "AUTH_FAILED",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::IpPoolExhausted => "IP_POOL_EXHAUSTED",
            CoreError::IpPoolContended => "IP_POOL_CONTENDED",
            CoreError::NodeAtCapacity => "NODE_AT_CAPACITY",
            CoreError::NoNodesConfigured => "NO_NODES_CONFIGURED",
            CoreError::PeersOrphaned(_) => "PEERS_ORPHANED",
            CoreError::AgentUnreachable(_) => "AGENT_UNREACHABLE",
            CoreError::AgentError(_) => "AGENT_ERROR",
            CoreError::DnsProviderError(_) => "DNS_PROVIDER_ERROR",
            CoreError::DriftReconcilePartial => "DRIFT_RECONCILE_PARTIAL",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::AuthFailed => StatusCode::UNAUTHORIZED,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_)
            | CoreError::IpPoolExhausted
            | CoreError::IpPoolContended
            | CoreError::NodeAtCapacity
            | CoreError::PeersOrphaned(_) => StatusCode::CONFLICT,
            CoreError::NoNodesConfigured => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::AgentUnreachable(_) | CoreError::AgentError(_) => StatusCode::BAD_GATEWAY,
            CoreError::DnsProviderError(_) => StatusCode::BAD_GATEWAY,
            CoreError::DriftReconcilePartial => StatusCode::OK,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let body = ErrorBody {
            error: self.to_string(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}
