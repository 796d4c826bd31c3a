use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Db;
use crate::error::CoreError;
use crate::models::Peer;

fn row_to_peer(row: &Row) -> rusqlite::Result<Peer> {
    let allowed_ips_raw: String = row.get("allowed_ips")?;
    Ok(Peer {
        id: row.get("id")?,
        node_id: row.get("node_id")?,
        interface_name: row.get("interface_name")?,
        config_name: row.get("config_name")?,
        public_key: row.get("public_key")?,
        allowed_ips: allowed_ips_raw
            .split(',')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        preshared_key: row.get("preshared_key")?,
        persistent_keepalive: row.get("persistent_keepalive")?,
        name: row.get("name")?,
        latest_handshake: row.get("latest_handshake")?,
        transfer_rx: row.get("transfer_rx")?,
        transfer_tx: row.get("transfer_tx")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const SELECT: &str = "SELECT id, node_id, interface_name, config_name, public_key, allowed_ips, \
    preshared_key, persistent_keepalive, name, latest_handshake, transfer_rx, transfer_tx, \
    created_at, updated_at FROM peers";

pub struct NewPeer {
    pub node_id: String,
    pub interface_name: String,
    pub config_name: String,
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    pub preshared_key: Option<String>,
    pub persistent_keepalive: i64,
    pub name: Option<String>,
}

fn join_ips(ips: &[String]) -> String {
    ips.join(",")
}

pub fn create(db: &Db, new: NewPeer) -> Result<Peer, CoreError> {
    let conn = db.lock().unwrap();
    let id = Uuid::new_v4().to_string();
    let result = conn.execute(
        "INSERT INTO peers (id, node_id, interface_name, config_name, public_key, allowed_ips, \
         preshared_key, persistent_keepalive, name) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            new.node_id,
            new.interface_name,
            new.config_name,
            new.public_key,
            join_ips(&new.allowed_ips),
            new.preshared_key,
            new.persistent_keepalive,
            new.name,
        ],
    );
    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(CoreError::Conflict("public key already registered".into()));
        }
        Err(e) => return Err(e.into()),
    }
    drop(conn);
    get_by_id(db, &id)?.ok_or_else(|| CoreError::Internal("peer vanished after insert".into()))
}

pub fn get_by_id(db: &Db, id: &str) -> Result<Option<Peer>, CoreError> {
    let conn = db.lock().unwrap();
    Ok(conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], row_to_peer)
        .optional()?)
}

pub fn get_by_public_key(db: &Db, public_key: &str) -> Result<Option<Peer>, CoreError> {
    let conn = db.lock().unwrap();
    Ok(conn
        .query_row(
            &format!("{SELECT} WHERE public_key = ?1"),
            params![public_key],
            row_to_peer,
        )
        .optional()?)
}

pub fn list_for_node_interface(
    db: &Db,
    node_id: &str,
    interface_name: &str,
) -> Result<Vec<Peer>, CoreError> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE node_id = ?1 AND interface_name = ?2"))?;
    Ok(stmt
        .query_map(params![node_id, interface_name], row_to_peer)?
        .collect::<Result<Vec<_>, _>>()?)
}

pub fn list_for_config(db: &Db, config_name: &str) -> Result<Vec<Peer>, CoreError> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE config_name = ?1"))?;
    Ok(stmt
        .query_map(params![config_name], row_to_peer)?
        .collect::<Result<Vec<_>, _>>()?)
}

pub fn count_for_node(db: &Db, node_id: &str) -> Result<i64, CoreError> {
    let conn = db.lock().unwrap();
    Ok(conn.query_row(
        "SELECT count(*) FROM peers WHERE node_id = ?1",
        params![node_id],
        |r| r.get(0),
    )?)
}

pub fn count_for_node_config(db: &Db, node_id: &str, config_name: &str) -> Result<i64, CoreError> {
    let conn = db.lock().unwrap();
    Ok(conn.query_row(
        "SELECT count(*) FROM peers WHERE node_id = ?1 AND config_name = ?2",
        params![node_id, config_name],
        |r| r.get(0),
    )?)
}

pub struct PeerUpdate {
    pub allowed_ips: Option<Vec<String>>,
    pub persistent_keepalive: Option<i64>,
    pub name: Option<Option<String>>,
}

pub fn update(db: &Db, id: &str, patch: PeerUpdate) -> Result<Peer, CoreError> {
    {
        let conn = db.lock().unwrap();
        if let Some(ips) = &patch.allowed_ips {
            conn.execute(
                "UPDATE peers SET allowed_ips = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![join_ips(ips), id],
            )?;
        }
        if let Some(ka) = patch.persistent_keepalive {
            conn.execute(
                "UPDATE peers SET persistent_keepalive = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![ka, id],
            )?;
        }
        if let Some(name) = &patch.name {
            conn.execute(
                "UPDATE peers SET name = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![name, id],
            )?;
        }
    }
    get_by_id(db, id)?.ok_or_else(|| CoreError::NotFound(format!("peer {id} not found")))
}

pub fn update_telemetry(
    db: &Db,
    public_key: &str,
    latest_handshake: Option<i64>,
    transfer_rx: i64,
    transfer_tx: i64,
) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    conn.execute(
        "UPDATE peers SET latest_handshake = ?1, transfer_rx = ?2, transfer_tx = ?3, \
         updated_at = datetime('now') WHERE public_key = ?4",
        params![latest_handshake, transfer_rx, transfer_tx, public_key],
    )?;
    Ok(())
}

pub fn reassign_owner(
    db: &Db,
    id: &str,
    new_node_id: &str,
    new_interface_name: &str,
) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    conn.execute(
        "UPDATE peers SET node_id = ?1, interface_name = ?2, updated_at = datetime('now') WHERE id = ?3",
        params![new_node_id, new_interface_name, id],
    )?;
    Ok(())
}

pub fn delete(db: &Db, id: &str) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    let changed = conn.execute("DELETE FROM peers WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(CoreError::NotFound(format!("peer {id} not found")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::repo::node_repo::{self, NewNode};

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

    #[test]
    fn allowed_ips_round_trip_as_vec() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node_id = seeded_node(&db);
        let peer = create(
            &db,
            NewPeer {
                node_id,
                interface_name: "wg0".into(),
                config_name: "wg0".into(),
                public_key: "pk1".into(),
                allowed_ips: vec!["10.8.0.2/32".into(), "fd00::2/128".into()],
                preshared_key: None,
                persistent_keepalive: 25,
                name: Some("laptop".into()),
            },
        )
        .unwrap();
        assert_eq!(
            peer.allowed_ips,
            vec!["10.8.0.2/32".to_string(), "fd00::2/128".to_string()]
        );
    }

    #[test]
    fn duplicate_public_key_is_conflict() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node_id = seeded_node(&db);
        let new = |pk: &str| NewPeer {
            node_id: node_id.clone(),
            interface_name: "wg0".into(),
            config_name: "wg0".into(),
            public_key: pk.into(),
            allowed_ips: vec!["10.8.0.2/32".into()],
            preshared_key: None,
            persistent_keepalive: 0,
            name: None,
        };
        create(&db, new("dup")).unwrap();
        let err = create(&db, new("dup")).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn reassign_owner_moves_peer_to_new_node() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node_a = seeded_node(&db);
        let node_b = node_repo::create(
            &db,
            NewNode {
                name: "n2".into(),
                agent_url: "http://y".into(),
                shared_secret: "s".into(),
                weight: 100,
                max_peers: 0,
                group_id: None,
                enabled: true,
            },
        )
        .unwrap()
        .id;
        let peer = create(
            &db,
            NewPeer {
                node_id: node_a,
                interface_name: "wg0".into(),
                config_name: "wg0".into(),
                public_key: "pk".into(),
                allowed_ips: vec!["10.8.0.2/32".into()],
                preshared_key: None,
                persistent_keepalive: 0,
                name: None,
            },
        )
        .unwrap();
        reassign_owner(&db, &peer.id, &node_b, "wg0").unwrap();
        let moved = get_by_id(&db, &peer.id).unwrap().unwrap();
        assert_eq!(moved.node_id, node_b);
    }
}
