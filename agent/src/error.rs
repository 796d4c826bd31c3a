use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use wgfleet_proto::wire::ErrorBody;

/// Validation failures are 4xx, tool failures and internal faults are 5xx
/// with the tool's stderr in the body, auth failures are 401 with no body
/// leakage.
#[derive(Debug, thiserror::Error)]
pub enum AgentFault {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("unauthorized")]
    AuthFailed,
    #[error("{0}")]
    ToolFailure(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AgentFault {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AgentFault::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AgentFault::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AgentFault::AuthFailed => (StatusCode::UNAUTHORIZED, String::new()),
            AgentFault::ToolFailure(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            AgentFault::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };

        if matches!(self, AgentFault::AuthFailed) {
            return (status, ()).into_response();
        }

        (status, Json(ErrorBody::new(message))).into_response()
    }
}

impl From<anyhow::Error> for AgentFault {
    fn from(err: anyhow::Error) -> Self {
        AgentFault::Internal(err.to_string())
    }
}
