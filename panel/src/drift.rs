//! Drift detection and opt-in reconciliation.
//!
//! Compares the Agent's live peer dump against the Panel's database:
//! allowed_ips compared as sets, persistent_keepalive as integers, endpoint
//! and preshared_key excluded from comparison.

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;

use crate::agent_client::AgentClient;
use crate::db::Db;
use crate::error::CoreError;
use crate::models::Peer;
use crate::repo::peer_repo;
use wgfleet_proto::wire::{AddPeerRequest, UpdatePeerRequest, WgDumpPeer};

#[derive(Debug, Serialize)]
pub struct FieldMismatch {
    pub field: &'static str,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Serialize)]
pub struct UnknownPeer {
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    pub endpoint: Option<String>,
    pub persistent_keepalive: u32,
}

#[derive(Debug, Serialize)]
pub struct MissingPeer {
    pub public_key: String,
    pub name: Option<String>,
    pub allowed_ips: Vec<String>,
    pub peer_id: String,
}

#[derive(Debug, Serialize)]
pub struct MismatchedPeer {
    pub public_key: String,
    pub name: Option<String>,
    pub peer_id: String,
    pub mismatches: Vec<FieldMismatch>,
}

#[derive(Debug, Serialize)]
pub struct DriftSummary {
    pub unknown_count: usize,
    pub missing_count: usize,
    pub mismatched_count: usize,
    pub total_issues: usize,
}

#[derive(Debug, Serialize)]
pub struct DriftReport {
    pub has_drift: bool,
    pub unknown_peers: Vec<UnknownPeer>,
    pub missing_peers: Vec<MissingPeer>,
    pub mismatched_peers: Vec<MismatchedPeer>,
    pub summary: DriftSummary,
    pub node_id: String,
    pub detected_at: String,
}

fn ip_set(ips: &[String]) -> HashSet<&str> {
    ips.iter().map(String::as_str).collect()
}

fn compare(db_peer: &Peer, agent_peer: &WgDumpPeer) -> Vec<FieldMismatch> {
    let mut mismatches = Vec::new();

    if ip_set(&db_peer.allowed_ips) != ip_set(&agent_peer.allowed_ips) {
        mismatches.push(FieldMismatch {
            field: "allowed_ips",
            expected: db_peer.allowed_ips.join(","),
            actual: agent_peer.allowed_ips.join(","),
        });
    }

    if db_peer.persistent_keepalive != agent_peer.persistent_keepalive as i64 {
        mismatches.push(FieldMismatch {
            field: "persistent_keepalive",
            expected: db_peer.persistent_keepalive.to_string(),
            actual: agent_peer.persistent_keepalive.to_string(),
        });
    }

    mismatches
}

/// Compares the Panel-authoritative peer set for `(node_id, interface_name)`
/// against the Agent's live dump.
pub fn detect(
    db: &Db,
    node_id: &str,
    interface_name: &str,
    dump_peers: &[WgDumpPeer],
) -> Result<DriftReport, CoreError> {
    let db_peers = peer_repo::list_for_node_interface(db, node_id, interface_name)?;

    let agent_by_pk: std::collections::HashMap<&str, &WgDumpPeer> = dump_peers
        .iter()
        .map(|p| (p.public_key.as_str(), p))
        .collect();
    let db_by_pk: std::collections::HashMap<&str, &Peer> = db_peers
        .iter()
        .map(|p| (p.public_key.as_str(), p))
        .collect();

    let unknown_peers: Vec<UnknownPeer> = dump_peers
        .iter()
        .filter(|p| !db_by_pk.contains_key(p.public_key.as_str()))
        .map(|p| UnknownPeer {
            public_key: p.public_key.clone(),
            allowed_ips: p.allowed_ips.clone(),
            endpoint: p.endpoint.clone(),
            persistent_keepalive: p.persistent_keepalive,
        })
        .collect();

    let missing_peers: Vec<MissingPeer> = db_peers
        .iter()
        .filter(|p| !agent_by_pk.contains_key(p.public_key.as_str()))
        .map(|p| MissingPeer {
            public_key: p.public_key.clone(),
            name: p.name.clone(),
            allowed_ips: p.allowed_ips.clone(),
            peer_id: p.id.clone(),
        })
        .collect();

    let mut mismatched_peers = Vec::new();
    for db_peer in &db_peers {
        if let Some(agent_peer) = agent_by_pk.get(db_peer.public_key.as_str()) {
            let mismatches = compare(db_peer, agent_peer);
            if !mismatches.is_empty() {
                mismatched_peers.push(MismatchedPeer {
                    public_key: db_peer.public_key.clone(),
                    name: db_peer.name.clone(),
                    peer_id: db_peer.id.clone(),
                    mismatches,
                });
            }
        }
    }

    let summary = DriftSummary {
        unknown_count: unknown_peers.len(),
        missing_count: missing_peers.len(),
        mismatched_count: mismatched_peers.len(),
        total_issues: unknown_peers.len() + missing_peers.len() + mismatched_peers.len(),
    };
    let has_drift = summary.total_issues > 0;

    Ok(DriftReport {
        has_drift,
        unknown_peers,
        missing_peers,
        mismatched_peers,
        summary,
        node_id: node_id.to_string(),
        detected_at: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Default, Serialize, serde::Deserialize)]
pub struct ReconcileOptions {
    pub reconcile_missing: bool,
    pub reconcile_mismatched: bool,
    pub remove_unknown: bool,
}

#[derive(Debug, Serialize)]
pub struct ReconcileError {
    pub peer: String,
    pub action: &'static str,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ReconcileOutcome {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub errors: Vec<ReconcileError>,
}

/// Applies opted-in corrective actions via the Agent client. A single
/// failure is recorded and does not abort the rest.
pub async fn reconcile(
    db: &Db,
    client: &AgentClient,
    interface_name: &str,
    report: &DriftReport,
    opts: &ReconcileOptions,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    if opts.reconcile_missing {
        for missing in &report.missing_peers {
            let Ok(Some(peer)) = peer_repo::get_by_id(db, &missing.peer_id) else {
                continue;
            };
            let req = AddPeerRequest {
                public_key: peer.public_key.clone(),
                allowed_ips: peer.allowed_ips.clone(),
                preshared_key: peer.preshared_key.clone(),
                persistent_keepalive: peer.persistent_keepalive as u32,
            };
            match client.add_peer(interface_name, &req).await {
                Ok(()) => outcome.added.push(peer.public_key),
                Err(e) => outcome.errors.push(ReconcileError {
                    peer: peer.public_key,
                    action: "add",
                    error: e.to_string(),
                }),
            }
        }
    }

    if opts.reconcile_mismatched {
        for mismatched in &report.mismatched_peers {
            let Ok(Some(peer)) = peer_repo::get_by_id(db, &mismatched.peer_id) else {
                continue;
            };
            let req = UpdatePeerRequest {
                allowed_ips: Some(peer.allowed_ips.clone()),
                persistent_keepalive: Some(peer.persistent_keepalive as u32),
            };
            match client.update_peer(interface_name, &peer.public_key, &req).await {
                Ok(()) => outcome.updated.push(peer.public_key),
                Err(e) => outcome.errors.push(ReconcileError {
                    peer: peer.public_key,
                    action: "update",
                    error: e.to_string(),
                }),
            }
        }
    }

    if opts.remove_unknown {
        for unknown in &report.unknown_peers {
            match client.delete_peer(interface_name, &unknown.public_key).await {
                Ok(()) => outcome.removed.push(unknown.public_key.clone()),
                Err(e) => outcome.errors.push(ReconcileError {
                    peer: unknown.public_key.clone(),
                    action: "remove",
                    error: e.to_string(),
                }),
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::repo::node_repo::{self, NewNode};
    use crate::repo::peer_repo::NewPeer;

    fn seeded_node(db: &Db) -> String {
        node_repo::create(
            db,
            NewNode {
                name: "n1".into(),
                agent_url: "http://x".into(),
                shared_secret: "s".into(),
                weight: 100,
                max_peers: 0,
                group_id: None,
                enabled: true,
            },
        )
        .unwrap()
        .id
    }

    fn dump_peer(pk: &str, ips: &[&str], keepalive: u32) -> WgDumpPeer {
        WgDumpPeer {
            public_key: pk.into(),
            preshared_key: None,
            endpoint: Some("1.2.3.4:51820".into()),
            allowed_ips: ips.iter().map(|s| s.to_string()).collect(),
            latest_handshake: None,
            transfer_rx: 0,
            transfer_tx: 0,
            persistent_keepalive: keepalive,
        }
    }

    #[test]
    fn clean_state_has_no_drift() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node_id = seeded_node(&db);
        peer_repo::create(
            &db,
            NewPeer {
                node_id: node_id.clone(),
                interface_name: "wg0".into(),
                config_name: "wg0".into(),
                public_key: "pk1".into(),
                allowed_ips: vec!["10.8.0.2/32".into()],
                preshared_key: None,
                persistent_keepalive: 25,
                name: None,
            },
        )
        .unwrap();

        let dump = vec![dump_peer("pk1", &["10.8.0.2/32"], 25)];
        let report = detect(&db, &node_id, "wg0", &dump).unwrap();
        assert!(!report.has_drift);
    }

    #[test]
    fn classifies_unknown_missing_and_mismatched() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node_id = seeded_node(&db);
        peer_repo::create(
            &db,
            NewPeer {
                node_id: node_id.clone(),
                interface_name: "wg0".into(),
                config_name: "wg0".into(),
                public_key: "missing-pk".into(),
                allowed_ips: vec!["10.8.0.2/32".into()],
                preshared_key: None,
                persistent_keepalive: 0,
                name: None,
            },
        )
        .unwrap();
        peer_repo::create(
            &db,
            NewPeer {
                node_id: node_id.clone(),
                interface_name: "wg0".into(),
                config_name: "wg0".into(),
                public_key: "mismatched-pk".into(),
                allowed_ips: vec!["10.8.0.3/32".into()],
                preshared_key: None,
                persistent_keepalive: 25,
                name: None,
            },
        )
        .unwrap();

        let dump = vec![
            dump_peer("mismatched-pk", &["10.8.0.99/32"], 25),
            dump_peer("unknown-pk", &["10.8.0.50/32"], 0),
        ];
        let report = detect(&db, &node_id, "wg0", &dump).unwrap();

        assert!(report.has_drift);
        assert_eq!(report.summary.unknown_count, 1);
        assert_eq!(report.summary.missing_count, 1);
        assert_eq!(report.summary.mismatched_count, 1);
        assert_eq!(report.mismatched_peers[0].mismatches.len(), 1);
        assert_eq!(report.mismatched_peers[0].mismatches[0].field, "allowed_ips");
    }

    #[test]
    fn endpoint_and_psk_never_produce_mismatches() {
        let peer = Peer {
            id: "p1".into(),
            node_id: "n1".into(),
            interface_name: "wg0".into(),
            config_name: "wg0".into(),
            public_key: "pk1".into(),
            allowed_ips: vec!["10.8.0.2/32".into()],
            preshared_key: Some("psk-a".into()),
            persistent_keepalive: 25,
            name: None,
            latest_handshake: None,
            transfer_rx: 0,
            transfer_tx: 0,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let mut agent = dump_peer("pk1", &["10.8.0.2/32"], 25);
        agent.endpoint = Some("9.9.9.9:51820".into());
        agent.preshared_key = Some("psk-b".into());

        assert!(compare(&peer, &agent).is_empty());
    }
}
