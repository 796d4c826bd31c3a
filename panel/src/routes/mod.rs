mod audit;
mod configs;
mod drift;
mod nodes;
mod peers;

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::state::AppState;

/// Assembles the orchestration REST surface.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/api/nodes", get(nodes::list_nodes).post(nodes::create_node))
        .route("/api/nodes/enabled", get(nodes::list_enabled_nodes))
        .route(
            "/api/nodes/:id",
            get(nodes::get_node).put(nodes::update_node).delete(nodes::delete_node),
        )
        .route("/api/nodes/:id/toggle", post(nodes::toggle_node))
        .route("/api/nodes/:id/test", post(nodes::test_node))
        .route("/api/nodes/:id/ip-stats", get(nodes::node_ip_stats))
        .route(
            "/api/nodes/:id/interfaces",
            get(nodes::list_interfaces).post(nodes::create_interface),
        )
        .route(
            "/api/nodes/:id/interfaces/:iface_id",
            put(nodes::update_interface).delete(nodes::delete_interface),
        )
        .route("/api/drift/nodes", get(drift::drift_all_nodes))
        .route("/api/drift/nodes/:id", get(drift::drift_one_node))
        .route("/api/drift/nodes/:id/reconcile", post(drift::reconcile_node))
        .route(
            "/api/configs/:cfg/nodes",
            get(configs::list_config_nodes).post(configs::assign_config_node),
        )
        .route(
            "/api/configs/:cfg/nodes/:node_id",
            delete(configs::unassign_config_node),
        )
        .route(
            "/api/configs/:cfg/endpoint-group",
            get(configs::get_endpoint_group).post(configs::upsert_endpoint_group),
        )
        .route("/api/configs/:cfg/sync-dns", post(configs::sync_dns))
        .route(
            "/api/configs/:cfg/peers",
            get(peers::list_config_peers),
        )
        .route(
            "/api/configs/:cfg/peers/:peer_id",
            put(peers::update_peer).delete(peers::delete_peer),
        )
        .route("/api/addPeers/:cfg", post(peers::add_peers))
        .route("/api/deletePeers/:cfg", post(peers::delete_peers))
        .route("/api/restrictPeers/:cfg", post(peers::restrict_peers))
        .route("/api/allowAccessPeers/:cfg", post(peers::allow_access_peers))
        .route("/api/audit-logs", get(audit::query_audit_log))
        .with_state(state)
}
