//! Node placement for new peers.
//!
//! Scoring, capacity skip, and CPU/memory penalty thresholds for
//! auto-selecting a node.

use serde::Deserialize;

use crate::db::Db;
use crate::error::CoreError;
use crate::models::Node;
use crate::repo::{config_node_repo, node_repo};

#[derive(Debug, Deserialize, Default)]
struct HealthSystem {
    #[serde(default)]
    cpu_percent: Option<f32>,
    #[serde(default)]
    memory_percent: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct NodeHealth {
    #[serde(default)]
    active_peers: usize,
    #[serde(default)]
    system: Option<HealthSystem>,
}

fn parse_health(health_json: &str) -> NodeHealth {
    serde_json::from_str(health_json).unwrap_or_default()
}

fn active_peers(node: &Node) -> usize {
    parse_health(&node.health_json).active_peers
}

fn adjust_score_with_metrics(base_score: f64, node: &Node) -> f64 {
    let mut score = base_score;
    let Some(system) = parse_health(&node.health_json).system else {
        return score;
    };
    if let Some(cpu) = system.cpu_percent {
        if cpu > 80.0 {
            score += 0.5;
        } else if cpu > 60.0 {
            score += 0.2;
        } else if cpu > 40.0 {
            score += 0.05;
        }
    }
    if let Some(mem) = system.memory_percent {
        if mem > 85.0 {
            score += 0.4;
        } else if mem > 70.0 {
            score += 0.15;
        } else if mem > 50.0 {
            score += 0.05;
        }
    }
    score
}

fn base_score(node: &Node, active: usize) -> f64 {
    if node.max_peers > 0 {
        let utilization = active as f64 / node.max_peers as f64;
        if node.weight > 0 {
            utilization / node.weight as f64
        } else {
            utilization
        }
    } else if node.weight > 0 {
        active as f64 / node.weight as f64
    } else {
        active as f64
    }
}

fn at_capacity(node: &Node, active: usize) -> bool {
    node.max_peers > 0 && active as i64 >= node.max_peers
}

pub enum Strategy {
    Auto,
    Specific(String),
}

/// Selects a node for a new peer. `config_name` scopes candidates to nodes
/// assigned to that configuration; `group_id` further narrows to a group.
pub fn select_node(
    db: &Db,
    config_name: &str,
    strategy: Strategy,
    group_id: Option<&str>,
) -> Result<Node, CoreError> {
    match strategy {
        Strategy::Specific(node_id) => select_specific(db, &node_id, group_id),
        Strategy::Auto => select_auto(db, config_name, group_id),
    }
}

fn select_specific(db: &Db, node_id: &str, group_id: Option<&str>) -> Result<Node, CoreError> {
    let node = node_repo::get_by_id(db, node_id)?
        .ok_or_else(|| CoreError::NotFound(format!("node {node_id} not found")))?;
    if !node.enabled {
        return Err(CoreError::Validation(format!("node {} is disabled", node.name)));
    }
    if let Some(g) = group_id {
        if node.group_id.as_deref() != Some(g) {
            return Err(CoreError::Validation(format!(
                "node {} is not in the requested group",
                node.name
            )));
        }
    }
    let active = active_peers(&node);
    if at_capacity(&node, active) {
        return Err(CoreError::NodeAtCapacity);
    }
    Ok(node)
}

fn select_auto(db: &Db, config_name: &str, group_id: Option<&str>) -> Result<Node, CoreError> {
    if node_repo::list_all(db)?.is_empty() {
        return Err(CoreError::NoNodesConfigured);
    }

    let mut enabled: Vec<Node> = config_node_repo::nodes_for_config(db, config_name)?
        .into_iter()
        .filter(|n| n.enabled)
        .collect();

    if let Some(g) = group_id {
        enabled.retain(|n| n.group_id.as_deref() == Some(g));
    }

    if enabled.is_empty() {
        return Err(CoreError::Validation(
            "no enabled nodes available for this configuration".into(),
        ));
    }

    let mut candidates: Vec<(f64, Node)> = Vec::new();
    for node in enabled {
        let active = active_peers(&node);
        if at_capacity(&node, active) {
            continue;
        }
        let score = adjust_score_with_metrics(base_score(&node, active), &node);
        candidates.push((score, node));
    }

    if candidates.is_empty() {
        return Err(CoreError::NodeAtCapacity);
    }

    candidates.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });

    Ok(candidates.into_iter().next().unwrap().1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::repo::node_repo::NewNode;

    fn node_with_health(db: &Db, name: &str, weight: i64, max_peers: i64, health: &str) -> Node {
        let node = node_repo::create(
            db,
            NewNode {
                name: name.into(),
                agent_url: "http://x".into(),
                shared_secret: "s".into(),
                weight,
                max_peers,
                group_id: None,
                enabled: true,
            },
        )
        .unwrap();
        node_repo::update_health(db, &node.id, health, true).unwrap();
        config_node_repo::assign(db, "wg0", &node.id).unwrap();
        node_repo::get_by_id(db, &node.id).unwrap().unwrap()
    }

    #[test]
    fn picks_least_utilized_node_under_equal_weight() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        node_with_health(&db, "n1", 100, 100, r#"{"active_peers": 50}"#);
        let n2 = node_with_health(&db, "n2", 100, 100, r#"{"active_peers": 25}"#);

        let picked = select_node(&db, "wg0", Strategy::Auto, None).unwrap();
        assert_eq!(picked.id, n2.id);
    }

    #[test]
    fn skips_node_at_capacity() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        node_with_health(&db, "full", 100, 10, r#"{"active_peers": 10}"#);
        let open = node_with_health(&db, "open", 100, 10, r#"{"active_peers": 1}"#);

        let picked = select_node(&db, "wg0", Strategy::Auto, None).unwrap();
        assert_eq!(picked.id, open.id);
    }

    #[test]
    fn high_cpu_penalty_can_flip_the_winner() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        // n1 has fewer active peers but very high CPU
        node_with_health(
            &db,
            "n1",
            100,
            100,
            r#"{"active_peers": 5, "system": {"cpu_percent": 95.0}}"#,
        );
        let n2 = node_with_health(
            &db,
            "n2",
            100,
            100,
            r#"{"active_peers": 10, "system": {"cpu_percent": 10.0}}"#,
        );

        let picked = select_node(&db, "wg0", Strategy::Auto, None).unwrap();
        assert_eq!(picked.id, n2.id);
    }

    #[test]
    fn no_nodes_configured_is_distinguished() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let err = select_node(&db, "wg0", Strategy::Auto, None).unwrap_err();
        assert!(matches!(err, CoreError::NoNodesConfigured));
    }
}
