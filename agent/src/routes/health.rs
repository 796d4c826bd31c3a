use axum::extract::State;
use axum::Json;

use wgfleet_proto::wire::HealthResponse;

use crate::state::AgentState;

pub async fn health(State(state): State<AgentState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
