use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Db;
use crate::error::CoreError;
use crate::models::{ConfigNode, Node};

use super::node_repo;

fn row_to_config_node(row: &Row) -> rusqlite::Result<ConfigNode> {
    Ok(ConfigNode {
        id: row.get("id")?,
        config_name: row.get("config_name")?,
        node_id: row.get("node_id")?,
        is_healthy: row.get("is_healthy")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const SELECT: &str =
    "SELECT id, config_name, node_id, is_healthy, created_at, updated_at FROM config_nodes";

/// Assigns a node to a configuration. Assigning the same node twice is a
/// no-op that reports `false`.
pub fn assign(db: &Db, config_name: &str, node_id: &str) -> Result<bool, CoreError> {
    let conn = db.lock().unwrap();
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM config_nodes WHERE config_name = ?1 AND node_id = ?2",
            params![config_name, node_id],
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(false);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO config_nodes (id, config_name, node_id) VALUES (?1, ?2, ?3)",
        params![id, config_name, node_id],
    )?;
    Ok(true)
}

pub fn unassign(db: &Db, config_name: &str, node_id: &str) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    conn.execute(
        "DELETE FROM config_nodes WHERE config_name = ?1 AND node_id = ?2",
        params![config_name, node_id],
    )?;
    Ok(())
}

pub fn nodes_for_config(db: &Db, config_name: &str) -> Result<Vec<Node>, CoreError> {
    let ids: Vec<String> = {
        let conn = db.lock().unwrap();
        let mut stmt = conn.prepare("SELECT node_id FROM config_nodes WHERE config_name = ?1")?;
        stmt.query_map(params![config_name], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?
    };
    ids.into_iter()
        .filter_map(|id| node_repo::get_by_id(db, &id).transpose())
        .collect()
}

pub fn healthy_nodes_for_config(db: &Db, config_name: &str) -> Result<Vec<Node>, CoreError> {
    let ids: Vec<String> = {
        let conn = db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT node_id FROM config_nodes WHERE config_name = ?1 AND is_healthy = 1",
        )?;
        stmt.query_map(params![config_name], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?
    };
    ids.into_iter()
        .filter_map(|id| node_repo::get_by_id(db, &id).transpose())
        .collect()
}

pub fn configs_for_node(db: &Db, node_id: &str) -> Result<Vec<ConfigNode>, CoreError> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE node_id = ?1"))?;
    Ok(stmt
        .query_map(params![node_id], row_to_config_node)?
        .collect::<Result<Vec<_>, _>>()?)
}

/// All assignment rows for a configuration, healthy or not — used by the DNS
/// reconciler (needs `is_healthy` per node) and the auto-migrate sweep.
pub fn list_for_config(db: &Db, config_name: &str) -> Result<Vec<ConfigNode>, CoreError> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE config_name = ?1"))?;
    Ok(stmt
        .query_map(params![config_name], row_to_config_node)?
        .collect::<Result<Vec<_>, _>>()?)
}

pub fn update_health(db: &Db, config_name: &str, node_id: &str, is_healthy: bool) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    conn.execute(
        "UPDATE config_nodes SET is_healthy = ?1, updated_at = datetime('now') \
         WHERE config_name = ?2 AND node_id = ?3",
        params![is_healthy, config_name, node_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::repo::node_repo::NewNode;

    #[test]
    fn assigning_twice_is_a_noop() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node_id = node_repo::create(
            &db,
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
        .id;
        assert!(assign(&db, "office", &node_id).unwrap());
        assert!(!assign(&db, "office", &node_id).unwrap());
    }

    #[test]
    fn healthy_filter_excludes_unhealthy_nodes() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node_id = node_repo::create(
            &db,
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
        .id;
        assign(&db, "office", &node_id).unwrap();
        update_health(&db, "office", &node_id, false).unwrap();
        assert!(healthy_nodes_for_config(&db, "office").unwrap().is_empty());
        assert_eq!(nodes_for_config(&db, "office").unwrap().len(), 1);
    }
}
