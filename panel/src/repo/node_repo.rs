use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Db;
use crate::error::CoreError;
use crate::models::Node;

fn row_to_node(row: &Row) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get("id")?,
        name: row.get("name")?,
        agent_url: row.get("agent_url")?,
        auth_type: row.get("auth_type")?,
        shared_secret: row.get("shared_secret")?,
        enabled: row.get("enabled")?,
        weight: row.get("weight")?,
        max_peers: row.get("max_peers")?,
        group_id: row.get("group_id")?,
        health_json: row.get("health_json")?,
        last_seen: row.get("last_seen")?,
        override_listen_port: row.get("override_listen_port")?,
        override_dns: row.get("override_dns")?,
        override_mtu: row.get("override_mtu")?,
        override_keepalive: row.get("override_keepalive")?,
        override_endpoint_allowed_ip: row.get("override_endpoint_allowed_ip")?,
        override_post_up: row.get("override_post_up")?,
        override_pre_down: row.get("override_pre_down")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const SELECT: &str = "SELECT id, name, agent_url, auth_type, shared_secret, enabled, weight, \
    max_peers, group_id, health_json, last_seen, override_listen_port, override_dns, \
    override_mtu, override_keepalive, override_endpoint_allowed_ip, override_post_up, \
    override_pre_down, created_at, updated_at \
    FROM nodes";

pub struct NewNode {
    pub name: String,
    pub agent_url: String,
    pub shared_secret: String,
    pub weight: i64,
    pub max_peers: i64,
    pub group_id: Option<String>,
    pub enabled: bool,
}

pub fn create(db: &Db, new: NewNode) -> Result<Node, CoreError> {
    let conn = db.lock().unwrap();
    let id = Uuid::new_v4().to_string();
    let result = conn.execute(
        "INSERT INTO nodes (id, name, agent_url, shared_secret, weight, max_peers, group_id, enabled) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            new.name,
            new.agent_url,
            new.shared_secret,
            new.weight,
            new.max_peers,
            new.group_id,
            new.enabled
        ],
    );

    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(CoreError::Conflict(format!(
                "node name '{}' already exists",
                new.name
            )));
        }
        Err(e) => return Err(e.into()),
    }

    get_by_id(db, &id)?.ok_or_else(|| CoreError::Internal("node vanished after insert".into()))
}

pub fn get_by_id(db: &Db, id: &str) -> Result<Option<Node>, CoreError> {
    let conn = db.lock().unwrap();
    let node = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], row_to_node)
        .optional()?;
    Ok(node)
}

pub fn list_all(db: &Db) -> Result<Vec<Node>, CoreError> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(SELECT)?;
    let nodes = stmt
        .query_map([], row_to_node)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

pub fn list_enabled(db: &Db) -> Result<Vec<Node>, CoreError> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE enabled = 1"))?;
    let nodes = stmt
        .query_map([], row_to_node)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

pub fn list_by_group(db: &Db, group_id: Option<&str>, enabled_only: bool) -> Result<Vec<Node>, CoreError> {
    let conn = db.lock().unwrap();
    let suffix = if enabled_only { " AND enabled = 1" } else { "" };
    let mut stmt = match group_id {
        Some(_) => conn.prepare(&format!("{SELECT} WHERE group_id = ?1{suffix}"))?,
        None => conn.prepare(&format!("{SELECT} WHERE group_id IS NULL{suffix}"))?,
    };
    let nodes = match group_id {
        Some(g) => stmt
            .query_map(params![g], row_to_node)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map([], row_to_node)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(nodes)
}

pub struct NodeUpdate {
    pub name: Option<String>,
    pub agent_url: Option<String>,
    pub weight: Option<i64>,
    pub max_peers: Option<i64>,
    pub group_id: Option<Option<String>>,
    pub override_listen_port: Option<Option<i64>>,
    pub override_dns: Option<Option<String>>,
    pub override_mtu: Option<Option<i64>>,
    pub override_keepalive: Option<Option<i64>>,
    pub override_endpoint_allowed_ip: Option<Option<String>>,
    pub override_post_up: Option<Option<String>>,
    pub override_pre_down: Option<Option<String>>,
}

pub fn update(db: &Db, id: &str, patch: NodeUpdate) -> Result<Node, CoreError> {
    {
        let conn = db.lock().unwrap();
        let existing: Option<i64> = conn
            .query_row("SELECT 1 FROM nodes WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        if existing.is_none() {
            return Err(CoreError::NotFound(format!("node {id} not found")));
        }

        if let Some(name) = &patch.name {
            conn.execute(
                "UPDATE nodes SET name = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![name, id],
            )?;
        }
        if let Some(url) = &patch.agent_url {
            conn.execute(
                "UPDATE nodes SET agent_url = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![url, id],
            )?;
        }
        if let Some(weight) = patch.weight {
            conn.execute(
                "UPDATE nodes SET weight = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![weight, id],
            )?;
        }
        if let Some(max_peers) = patch.max_peers {
            conn.execute(
                "UPDATE nodes SET max_peers = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![max_peers, id],
            )?;
        }
        if let Some(group_id) = &patch.group_id {
            conn.execute(
                "UPDATE nodes SET group_id = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![group_id, id],
            )?;
        }
        if let Some(v) = &patch.override_listen_port {
            conn.execute(
                "UPDATE nodes SET override_listen_port = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.override_dns {
            conn.execute(
                "UPDATE nodes SET override_dns = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.override_mtu {
            conn.execute(
                "UPDATE nodes SET override_mtu = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.override_keepalive {
            conn.execute(
                "UPDATE nodes SET override_keepalive = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.override_endpoint_allowed_ip {
            conn.execute(
                "UPDATE nodes SET override_endpoint_allowed_ip = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.override_post_up {
            conn.execute(
                "UPDATE nodes SET override_post_up = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.override_pre_down {
            conn.execute(
                "UPDATE nodes SET override_pre_down = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
    }

    get_by_id(db, id)?.ok_or_else(|| CoreError::NotFound(format!("node {id} not found")))
}

pub fn toggle_enabled(db: &Db, id: &str, enabled: bool) -> Result<Node, CoreError> {
    {
        let conn = db.lock().unwrap();
        let changed = conn.execute(
            "UPDATE nodes SET enabled = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![enabled, id],
        )?;
        if changed == 0 {
            return Err(CoreError::NotFound(format!("node {id} not found")));
        }
    }
    get_by_id(db, id)?.ok_or_else(|| CoreError::NotFound(format!("node {id} not found")))
}

/// Node deletion requires zero owned peers; enforced by the caller checking
/// `peer_repo::count_for_node` first.
pub fn delete(db: &Db, id: &str) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    let changed = conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(CoreError::NotFound(format!("node {id} not found")));
    }
    Ok(())
}

/// Persists a poll round's result. `last_seen` only advances when `healthy_now`
/// is true — it tracks the last successful contact, not the last attempt, so
/// the health poller's grace-window check (`last_seen` age vs. poll periods)
/// actually lapses for a node that stays down instead of being refreshed by
/// every failed poll.
pub fn update_health(db: &Db, id: &str, health_json: &str, healthy_now: bool) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    if healthy_now {
        conn.execute(
            "UPDATE nodes SET last_seen = datetime('now'), health_json = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![health_json, id],
        )?;
    } else {
        conn.execute(
            "UPDATE nodes SET health_json = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![health_json, id],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_db() -> Db {
        db::open(std::path::Path::new(":memory:")).unwrap()
    }

    #[test]
    fn create_then_get_round_trips() {
        let db = test_db();
        let node = create(
            &db,
            NewNode {
                name: "node-a".into(),
                agent_url: "http://10.0.0.1:8080".into(),
                shared_secret: "s3cr3t".into(),
                weight: 100,
                max_peers: 0,
                group_id: None,
                enabled: true,
            },
        )
        .unwrap();

        let fetched = get_by_id(&db, &node.id).unwrap().unwrap();
        assert_eq!(fetched.name, "node-a");
        assert!(fetched.enabled);
    }

    #[test]
    fn duplicate_name_is_conflict() {
        let db = test_db();
        let new = |name: &str| NewNode {
            name: name.into(),
            agent_url: "http://x".into(),
            shared_secret: "s".into(),
            weight: 100,
            max_peers: 0,
            group_id: None,
            enabled: true,
        };
        create(&db, new("dup")).unwrap();
        let err = create(&db, new("dup")).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn toggle_enabled_updates_flag() {
        let db = test_db();
        let node = create(
            &db,
            NewNode {
                name: "node-b".into(),
                agent_url: "http://x".into(),
                shared_secret: "s".into(),
                weight: 100,
                max_peers: 0,
                group_id: None,
                enabled: true,
            },
        )
        .unwrap();
        let updated = toggle_enabled(&db, &node.id, false).unwrap();
        assert!(!updated.enabled);
    }

    #[test]
    fn failed_poll_does_not_advance_last_seen() {
        let db = test_db();
        let node = create(
            &db,
            NewNode {
                name: "node-c".into(),
                agent_url: "http://x".into(),
                shared_secret: "s".into(),
                weight: 100,
                max_peers: 0,
                group_id: None,
                enabled: true,
            },
        )
        .unwrap();
        assert!(node.last_seen.is_none());

        update_health(&db, &node.id, r#"{"healthy":true}"#, true).unwrap();
        let after_success = get_by_id(&db, &node.id).unwrap().unwrap();
        assert!(after_success.last_seen.is_some());

        update_health(&db, &node.id, r#"{"healthy":false}"#, false).unwrap();
        let after_failure = get_by_id(&db, &node.id).unwrap().unwrap();
        assert_eq!(after_failure.last_seen, after_success.last_seen);
        assert_eq!(after_failure.health_json, r#"{"healthy":false}"#);
    }
}
