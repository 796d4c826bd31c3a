use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Db;
use crate::error::CoreError;
use crate::models::NodeInterface;

fn row_to_iface(row: &Row) -> rusqlite::Result<NodeInterface> {
    Ok(NodeInterface {
        id: row.get("id")?,
        node_id: row.get("node_id")?,
        interface_name: row.get("interface_name")?,
        endpoint: row.get("endpoint")?,
        ip_pool_cidr: row.get("ip_pool_cidr")?,
        listen_port: row.get("listen_port")?,
        address: row.get("address")?,
        private_key: row.get("private_key")?,
        post_up: row.get("post_up")?,
        pre_down: row.get("pre_down")?,
        mtu: row.get("mtu")?,
        dns: row.get("dns")?,
        table: row.get("table")?,
        enabled: row.get("enabled")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const SELECT: &str = r#"SELECT id, node_id, interface_name, endpoint, ip_pool_cidr, listen_port,
    address, private_key, post_up, pre_down, mtu, dns, "table", enabled, created_at, updated_at
    FROM node_interfaces"#;

pub struct NewInterface {
    pub node_id: String,
    pub interface_name: String,
    pub endpoint: String,
    pub ip_pool_cidr: String,
    pub private_key: String,
    pub listen_port: Option<i64>,
    pub address: Option<String>,
    pub post_up: Option<String>,
    pub pre_down: Option<String>,
    pub mtu: Option<i64>,
    pub dns: Option<String>,
    pub table: Option<String>,
}

pub fn create(db: &Db, new: NewInterface) -> Result<NodeInterface, CoreError> {
    let conn = db.lock().unwrap();
    let id = Uuid::new_v4().to_string();
    let result = conn.execute(
        r#"INSERT INTO node_interfaces
            (id, node_id, interface_name, endpoint, ip_pool_cidr, private_key, listen_port,
             address, post_up, pre_down, mtu, dns, "table")
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
        params![
            id,
            new.node_id,
            new.interface_name,
            new.endpoint,
            new.ip_pool_cidr,
            new.private_key,
            new.listen_port,
            new.address,
            new.post_up,
            new.pre_down,
            new.mtu,
            new.dns,
            new.table,
        ],
    );
    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(CoreError::Conflict(format!(
                "interface '{}' already exists on this node",
                new.interface_name
            )));
        }
        Err(e) => return Err(e.into()),
    }
    drop(conn);
    get_by_id(db, &id)?.ok_or_else(|| CoreError::Internal("interface vanished after insert".into()))
}

pub fn get_by_id(db: &Db, id: &str) -> Result<Option<NodeInterface>, CoreError> {
    let conn = db.lock().unwrap();
    Ok(conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], row_to_iface)
        .optional()?)
}

pub fn get_by_node_and_name(
    db: &Db,
    node_id: &str,
    interface_name: &str,
) -> Result<Option<NodeInterface>, CoreError> {
    let conn = db.lock().unwrap();
    Ok(conn
        .query_row(
            &format!("{SELECT} WHERE node_id = ?1 AND interface_name = ?2"),
            params![node_id, interface_name],
            row_to_iface,
        )
        .optional()?)
}

pub fn list_for_node(db: &Db, node_id: &str) -> Result<Vec<NodeInterface>, CoreError> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE node_id = ?1"))?;
    Ok(stmt
        .query_map(params![node_id], row_to_iface)?
        .collect::<Result<Vec<_>, _>>()?)
}

pub fn delete(db: &Db, id: &str) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    let changed = conn.execute("DELETE FROM node_interfaces WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(CoreError::NotFound(format!("interface {id} not found")));
    }
    Ok(())
}

#[derive(Default)]
pub struct InterfaceUpdate {
    pub endpoint: Option<String>,
    pub ip_pool_cidr: Option<String>,
    pub listen_port: Option<Option<i64>>,
    pub address: Option<Option<String>>,
    pub post_up: Option<Option<String>>,
    pub pre_down: Option<Option<String>>,
    pub mtu: Option<Option<i64>>,
    pub dns: Option<Option<String>>,
    pub table: Option<Option<String>>,
    pub enabled: Option<bool>,
}

pub fn update(db: &Db, id: &str, patch: InterfaceUpdate) -> Result<NodeInterface, CoreError> {
    {
        let conn = db.lock().unwrap();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM node_interfaces WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_none() {
            return Err(CoreError::NotFound(format!("interface {id} not found")));
        }
        if let Some(v) = &patch.endpoint {
            conn.execute(
                "UPDATE node_interfaces SET endpoint = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.ip_pool_cidr {
            conn.execute(
                "UPDATE node_interfaces SET ip_pool_cidr = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.listen_port {
            conn.execute(
                "UPDATE node_interfaces SET listen_port = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.address {
            conn.execute(
                "UPDATE node_interfaces SET address = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.post_up {
            conn.execute(
                "UPDATE node_interfaces SET post_up = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.pre_down {
            conn.execute(
                "UPDATE node_interfaces SET pre_down = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.mtu {
            conn.execute(
                "UPDATE node_interfaces SET mtu = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.dns {
            conn.execute(
                "UPDATE node_interfaces SET dns = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
        if let Some(v) = &patch.table {
            conn.execute(
                r#"UPDATE node_interfaces SET "table" = ?1, updated_at = datetime('now') WHERE id = ?2"#,
                params![v, id],
            )?;
        }
        if let Some(v) = patch.enabled {
            conn.execute(
                "UPDATE node_interfaces SET enabled = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![v, id],
            )?;
        }
    }
    get_by_id(db, id)?.ok_or_else(|| CoreError::NotFound(format!("interface {id} not found")))
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
    fn create_and_fetch_by_node_and_name() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node_id = seeded_node(&db);
        create(
            &db,
            NewInterface {
                node_id: node_id.clone(),
                interface_name: "wg0".into(),
                endpoint: "vpn.example.com:51820".into(),
                ip_pool_cidr: "10.8.0.0/24".into(),
                private_key: "priv".into(),
                listen_port: Some(51820),
                address: Some("10.8.0.1/24".into()),
                post_up: None,
                pre_down: None,
                mtu: None,
                dns: None,
                table: None,
            },
        )
        .unwrap();

        let found = get_by_node_and_name(&db, &node_id, "wg0").unwrap().unwrap();
        assert_eq!(found.endpoint, "vpn.example.com:51820");
    }

    #[test]
    fn duplicate_interface_name_on_node_is_conflict() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let node_id = seeded_node(&db);
        let new = |name: &str| NewInterface {
            node_id: node_id.clone(),
            interface_name: name.into(),
            endpoint: "e:1".into(),
            ip_pool_cidr: "10.8.0.0/24".into(),
            private_key: "k".into(),
            listen_port: None,
            address: None,
            post_up: None,
            pre_down: None,
            mtu: None,
            dns: None,
            table: None,
        };
        create(&db, new("wg0")).unwrap();
        let err = create(&db, new("wg0")).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }
}
