mod health;
mod interface;
mod metrics;
mod peers;
mod status;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;

use crate::auth::verify_signature;
use crate::state::AgentState;

pub fn build(state: AgentState) -> Router {
    let authenticated = Router::new()
        .route("/v1/status", get(status::status))
        .route("/v1/wg/:interface/dump", get(peers::dump))
        .route("/v1/wg/:interface/peers", post(peers::add_peer))
        .route(
            "/v1/wg/:interface/peers/:public_key",
            put(peers::update_peer).delete(peers::delete_peer),
        )
        .route("/v1/wg/:interface/syncconf", post(interface::syncconf))
        .route(
            "/v1/wg/:interface/config",
            get(interface::get_config).put(interface::put_config),
        )
        .route("/v1/wg/:interface/enable", post(interface::enable))
        .route("/v1/wg/:interface/disable", post(interface::disable))
        .route(
            "/v1/wg/:interface",
            axum::routing::delete(interface::delete_interface),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_signature,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/v1/metrics", get(metrics::metrics))
        .merge(authenticated)
        .with_state(state)
}
