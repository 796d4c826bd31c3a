//! HMAC verification middleware for every endpoint except `/health` and
//! `/v1/metrics` (wired up as unauthenticated routes, not via this layer).

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use wgfleet_proto::hmac_auth::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};

use crate::error::AgentFault;
use crate::state::AgentState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn verify_signature(
    State(state): State<AgentState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AgentFault> {
    let (parts, body) = request.into_parts();

    let timestamp = parts
        .headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body_bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| AgentFault::Validation("body too large".into()))?;
    let body_str = String::from_utf8_lossy(&body_bytes).to_string();

    let now = chrono_now();
    hmac_auth::verify(
        &state.config.shared_secret,
        parts.method.as_str(),
        parts.uri.path(),
        &body_str,
        &timestamp,
        &signature,
        now,
    )
    .map_err(|_| AgentFault::AuthFailed)?;

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}

fn chrono_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
