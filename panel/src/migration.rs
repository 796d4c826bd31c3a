//! Peer migrator.
//!
//! Picks the least-loaded healthy destination, adds the peer there, rewrites
//! ownership in the database (the linearization point), then best-effort
//! deletes the peer from the source.

use serde::Serialize;
use tracing::warn;

use crate::agent_client::AgentClientFactory;
use crate::db::Db;
use crate::error::CoreError;
use crate::repo::{config_node_repo, interface_repo, node_repo, peer_repo};
use wgfleet_proto::wire::AddPeerRequest;

#[derive(Debug, Serialize)]
pub struct PeerMigrationStatus {
    pub public_key: String,
    pub destination_node_id: String,
    pub migrated: bool,
    pub source_delete_failed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MigrationResult {
    pub migrated_count: usize,
    pub total: usize,
    pub peers: Vec<PeerMigrationStatus>,
}

/// Moves every peer owned by `source_node_id` for `config_name` onto the
/// least-loaded remaining healthy, enabled node assigned to that config.
pub async fn migrate_node_peers(
    db: &Db,
    agents: &AgentClientFactory,
    config_name: &str,
    source_node_id: &str,
) -> Result<MigrationResult, CoreError> {
    let peers = peer_repo::list_for_config(db, config_name)?
        .into_iter()
        .filter(|p| p.node_id == source_node_id)
        .collect::<Vec<_>>();

    let total = peers.len();
    if total == 0 {
        return Ok(MigrationResult {
            migrated_count: 0,
            total: 0,
            peers: Vec::new(),
        });
    }

    let source_node = node_repo::get_by_id(db, source_node_id)?
        .ok_or_else(|| CoreError::NotFound(format!("node {source_node_id} not found")))?;

    let mut statuses = Vec::with_capacity(total);
    let mut migrated_count = 0;

    for peer in peers {
        let destination = match select_destination(db, config_name, source_node_id)? {
            Some(node) => node,
            None => {
                statuses.push(PeerMigrationStatus {
                    public_key: peer.public_key.clone(),
                    destination_node_id: String::new(),
                    migrated: false,
                    source_delete_failed: false,
                    error: Some("no migration destination available".into()),
                });
                continue;
            }
        };

        let dest_iface = interface_repo::list_for_node(db, &destination.id)?
            .into_iter()
            .find(|i| i.enabled)
            .map(|i| i.interface_name)
            .unwrap_or_else(|| peer.interface_name.clone());

        let dest_client = agents.for_node(&destination.agent_url, &destination.shared_secret);
        let add_req = AddPeerRequest {
            public_key: peer.public_key.clone(),
            allowed_ips: peer.allowed_ips.clone(),
            preshared_key: peer.preshared_key.clone(),
            persistent_keepalive: peer.persistent_keepalive as u32,
        };

        match dest_client.add_peer(&dest_iface, &add_req).await {
            Ok(()) => {}
            Err(e) => {
                statuses.push(PeerMigrationStatus {
                    public_key: peer.public_key.clone(),
                    destination_node_id: destination.id.clone(),
                    migrated: false,
                    source_delete_failed: false,
                    error: Some(e.to_string()),
                });
                continue;
            }
        }

        // Linearization point: the destination is authoritative for this
        // peer from here on, regardless of whether the source delete below
        // succeeds.
        peer_repo::reassign_owner(db, &peer.id, &destination.id, &dest_iface)?;
        migrated_count += 1;

        let source_client = agents.for_node(&source_node.agent_url, &source_node.shared_secret);
        let source_delete_failed = match source_client
            .delete_peer(&peer.interface_name, &peer.public_key)
            .await
        {
            Ok(()) => false,
            Err(e) => {
                warn!(
                    "migrated peer {} off {} but source delete failed: {e}",
                    peer.public_key, source_node.name
                );
                true
            }
        };

        statuses.push(PeerMigrationStatus {
            public_key: peer.public_key,
            destination_node_id: destination.id,
            migrated: true,
            source_delete_failed,
            error: None,
        });
    }

    Ok(MigrationResult {
        migrated_count,
        total,
        peers: statuses,
    })
}

fn select_destination(
    db: &Db,
    config_name: &str,
    source_node_id: &str,
) -> Result<Option<crate::models::Node>, CoreError> {
    let candidates: Vec<_> = config_node_repo::healthy_nodes_for_config(db, config_name)?
        .into_iter()
        .filter(|n| n.enabled && n.id != source_node_id)
        .collect();

    if candidates.is_empty() {
        return Ok(None);
    }

    let mut scored = Vec::with_capacity(candidates.len());
    for node in candidates {
        let owned = peer_repo::count_for_node_config(db, &node.id, config_name)?;
        scored.push((owned, node));
    }
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

    Ok(scored.into_iter().next().map(|(_, node)| node))
}

/// Returns an error if the node still owns peers for this config and no
/// migration destination exists — the hard-error path for node removal.
pub fn ensure_no_orphans(
    db: &Db,
    config_name: &str,
    source_node_id: &str,
) -> Result<(), CoreError> {
    let owned = peer_repo::count_for_node_config(db, source_node_id, config_name)?;
    if owned == 0 {
        return Ok(());
    }
    if select_destination(db, config_name, source_node_id)?.is_none() {
        return Err(CoreError::PeersOrphaned(format!(
            "node {source_node_id} owns {owned} peer(s) in config '{config_name}' with no migration destination"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::repo::config_node_repo;
    use crate::repo::node_repo::NewNode;
    use crate::repo::peer_repo::NewPeer;

    fn make_node(db: &Db, name: &str) -> crate::models::Node {
        let node = node_repo::create(
            db,
            NewNode {
                name: name.into(),
                agent_url: format!("http://{name}"),
                shared_secret: "s".into(),
                weight: 100,
                max_peers: 0,
                group_id: None,
                enabled: true,
            },
        )
        .unwrap();
        config_node_repo::assign(db, "wg0", &node.id).unwrap();
        node
    }

    #[test]
    fn picks_least_loaded_destination_excluding_source() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let source = make_node(&db, "src");
        let light = make_node(&db, "light");
        let heavy = make_node(&db, "heavy");

        for i in 0..3 {
            peer_repo::create(
                &db,
                NewPeer {
                    node_id: heavy.id.clone(),
                    interface_name: "wg0".into(),
                    config_name: "wg0".into(),
                    public_key: format!("heavy-{i}"),
                    allowed_ips: vec!["10.8.0.2/32".into()],
                    preshared_key: None,
                    persistent_keepalive: 0,
                    name: None,
                },
            )
            .unwrap();
        }

        let dest = select_destination(&db, "wg0", &source.id).unwrap().unwrap();
        assert_eq!(dest.id, light.id);
    }

    #[test]
    fn ensure_no_orphans_passes_when_node_owns_nothing() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node = make_node(&db, "n1");
        assert!(ensure_no_orphans(&db, "wg0", &node.id).is_ok());
    }

    #[test]
    fn ensure_no_orphans_fails_with_no_destination() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node = make_node(&db, "n1");
        peer_repo::create(
            &db,
            NewPeer {
                node_id: node.id.clone(),
                interface_name: "wg0".into(),
                config_name: "wg0".into(),
                public_key: "pk1".into(),
                allowed_ips: vec!["10.8.0.2/32".into()],
                preshared_key: None,
                persistent_keepalive: 0,
                name: None,
            },
        )
        .unwrap();
        let err = ensure_no_orphans(&db, "wg0", &node.id).unwrap_err();
        assert!(matches!(err, CoreError::PeersOrphaned(_)));
    }
}
