use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Db;
use crate::error::CoreError;
use crate::models::EndpointGroup;

fn row_to_group(row: &Row) -> rusqlite::Result<EndpointGroup> {
    Ok(EndpointGroup {
        id: row.get("id")?,
        config_name: row.get("config_name")?,
        domain: row.get("domain")?,
        port: row.get("port")?,
        cloudflare_zone_id: row.get("cloudflare_zone_id")?,
        cloudflare_record_name: row.get("cloudflare_record_name")?,
        ttl: row.get("ttl")?,
        proxied: row.get("proxied")?,
        auto_migrate: row.get("auto_migrate")?,
        publish_only_healthy: row.get("publish_only_healthy")?,
        min_nodes: row.get("min_nodes")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const SELECT: &str = "SELECT id, config_name, domain, port, cloudflare_zone_id, \
    cloudflare_record_name, ttl, proxied, auto_migrate, publish_only_healthy, min_nodes, \
    created_at, updated_at FROM endpoint_groups";

pub struct NewEndpointGroup {
    pub config_name: String,
    pub domain: String,
    pub port: i64,
    pub cloudflare_zone_id: String,
    pub cloudflare_record_name: String,
    pub ttl: i64,
    pub auto_migrate: bool,
    pub publish_only_healthy: bool,
    pub min_nodes: i64,
}

/// `proxied` is always forced to `false` on write: fleet records are bare A/AAAA
/// records, never behind a reverse proxy that would break the WireGuard handshake.
pub fn create(db: &Db, new: NewEndpointGroup) -> Result<EndpointGroup, CoreError> {
    let conn = db.lock().unwrap();
    let id = Uuid::new_v4().to_string();
    let result = conn.execute(
        "INSERT INTO endpoint_groups (id, config_name, domain, port, cloudflare_zone_id, \
         cloudflare_record_name, ttl, proxied, auto_migrate, publish_only_healthy, min_nodes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10)",
        params![
            id,
            new.config_name,
            new.domain,
            new.port,
            new.cloudflare_zone_id,
            new.cloudflare_record_name,
            new.ttl,
            new.auto_migrate,
            new.publish_only_healthy,
            new.min_nodes,
        ],
    );
    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(CoreError::Conflict(format!(
                "endpoint group for config '{}' already exists",
                new.config_name
            )));
        }
        Err(e) => return Err(e.into()),
    }
    drop(conn);
    get_by_config_name(db, &new.config_name)?
        .ok_or_else(|| CoreError::Internal("endpoint group vanished after insert".into()))
}

pub fn get_by_config_name(db: &Db, config_name: &str) -> Result<Option<EndpointGroup>, CoreError> {
    let conn = db.lock().unwrap();
    Ok(conn
        .query_row(
            &format!("{SELECT} WHERE config_name = ?1"),
            params![config_name],
            row_to_group,
        )
        .optional()?)
}

pub fn list_all(db: &Db) -> Result<Vec<EndpointGroup>, CoreError> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(SELECT)?;
    Ok(stmt
        .query_map([], row_to_group)?
        .collect::<Result<Vec<_>, _>>()?)
}

pub struct EndpointGroupUpdate {
    pub domain: Option<String>,
    pub port: Option<i64>,
    pub ttl: Option<i64>,
    pub auto_migrate: Option<bool>,
    pub publish_only_healthy: Option<bool>,
    pub min_nodes: Option<i64>,
}

pub fn update(
    db: &Db,
    config_name: &str,
    patch: EndpointGroupUpdate,
) -> Result<EndpointGroup, CoreError> {
    {
        let conn = db.lock().unwrap();
        if let Some(v) = &patch.domain {
            conn.execute(
                "UPDATE endpoint_groups SET domain = ?1, updated_at = datetime('now'), proxied = 0 WHERE config_name = ?2",
                params![v, config_name],
            )?;
        }
        if let Some(v) = patch.port {
            conn.execute(
                "UPDATE endpoint_groups SET port = ?1, updated_at = datetime('now'), proxied = 0 WHERE config_name = ?2",
                params![v, config_name],
            )?;
        }
        if let Some(v) = patch.ttl {
            conn.execute(
                "UPDATE endpoint_groups SET ttl = ?1, updated_at = datetime('now'), proxied = 0 WHERE config_name = ?2",
                params![v, config_name],
            )?;
        }
        if let Some(v) = patch.auto_migrate {
            conn.execute(
                "UPDATE endpoint_groups SET auto_migrate = ?1, updated_at = datetime('now'), proxied = 0 WHERE config_name = ?2",
                params![v, config_name],
            )?;
        }
        if let Some(v) = patch.publish_only_healthy {
            conn.execute(
                "UPDATE endpoint_groups SET publish_only_healthy = ?1, updated_at = datetime('now'), proxied = 0 WHERE config_name = ?2",
                params![v, config_name],
            )?;
        }
        if let Some(v) = patch.min_nodes {
            conn.execute(
                "UPDATE endpoint_groups SET min_nodes = ?1, updated_at = datetime('now'), proxied = 0 WHERE config_name = ?2",
                params![v, config_name],
            )?;
        }
    }
    get_by_config_name(db, config_name)?
        .ok_or_else(|| CoreError::NotFound(format!("endpoint group '{config_name}' not found")))
}

pub fn delete(db: &Db, config_name: &str) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    let changed = conn.execute(
        "DELETE FROM endpoint_groups WHERE config_name = ?1",
        params![config_name],
    )?;
    if changed == 0 {
        return Err(CoreError::NotFound(format!(
            "endpoint group '{config_name}' not found"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn proxied_is_always_forced_false() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let group = create(
            &db,
            NewEndpointGroup {
                config_name: "office".into(),
                domain: "office.example.com".into(),
                port: 51820,
                cloudflare_zone_id: "zone1".into(),
                cloudflare_record_name: "office".into(),
                ttl: 60,
                auto_migrate: true,
                publish_only_healthy: true,
                min_nodes: 1,
            },
        )
        .unwrap();
        assert!(!group.proxied);

        let updated = update(
            &db,
            "office",
            EndpointGroupUpdate {
                domain: Some("office2.example.com".into()),
                port: None,
                ttl: None,
                auto_migrate: None,
                publish_only_healthy: None,
                min_nodes: None,
            },
        )
        .unwrap();
        assert!(!updated.proxied);
    }

    #[test]
    fn duplicate_config_name_is_conflict() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        let new = || NewEndpointGroup {
            config_name: "office".into(),
            domain: "office.example.com".into(),
            port: 51820,
            cloudflare_zone_id: "zone1".into(),
            cloudflare_record_name: "office".into(),
            ttl: 60,
            auto_migrate: true,
            publish_only_healthy: true,
            min_nodes: 1,
        };
        create(&db, new()).unwrap();
        let err = create(&db, new()).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }
}
