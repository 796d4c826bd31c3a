use rusqlite::{params, Row};

use crate::db::Db;
use crate::error::CoreError;
use crate::models::AuditLogEntry;

fn row_to_entry(row: &Row) -> rusqlite::Result<AuditLogEntry> {
    let details_raw: Option<String> = row.get("details")?;
    let details = details_raw
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null);
    Ok(AuditLogEntry {
        id: row.get("id")?,
        timestamp: row.get("timestamp")?,
        action: row.get("action")?,
        entity_type: row.get("entity_type")?,
        entity_id: row.get("entity_id")?,
        details,
        actor: row.get("actor")?,
    })
}

/// Appends an entry. The log is append-only: there is no update or delete path.
pub fn log(
    db: &Db,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    details: &serde_json::Value,
    actor: Option<&str>,
) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO audit_log (action, entity_type, entity_id, details, actor) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![action, entity_type, entity_id, details.to_string(), actor],
    )?;
    Ok(())
}

pub struct AuditQuery<'a> {
    pub entity_type: Option<&'a str>,
    pub entity_id: Option<&'a str>,
    pub limit: i64,
    pub offset: i64,
}

pub fn query(db: &Db, q: AuditQuery) -> Result<Vec<AuditLogEntry>, CoreError> {
    let conn = db.lock().unwrap();
    const SQL: &str = "SELECT id, timestamp, action, entity_type, entity_id, details, actor \
        FROM audit_log \
        WHERE (?1 = '' OR entity_type = ?1) AND (?2 = '' OR entity_id = ?2) \
        ORDER BY timestamp DESC, id DESC LIMIT ?3 OFFSET ?4";

    let mut stmt = conn.prepare(SQL)?;
    let rows = stmt
        .query_map(
            params![
                q.entity_type.unwrap_or(""),
                q.entity_id.unwrap_or(""),
                q.limit,
                q.offset
            ],
            row_to_entry,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn query_filters_by_entity_type_and_orders_newest_first() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        log(&db, "create", "node", Some("n1"), &serde_json::json!({"name": "n1"}), None).unwrap();
        log(&db, "create", "peer", Some("p1"), &serde_json::json!({"pk": "x"}), None).unwrap();
        log(&db, "update", "node", Some("n1"), &serde_json::json!({"weight": 50}), None).unwrap();

        let entries = query(
            &db,
            AuditQuery {
                entity_type: Some("node"),
                entity_id: None,
                limit: 10,
                offset: 0,
            },
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "update");
        assert_eq!(entries[1].action, "create");
    }

    #[test]
    fn query_respects_pagination() {
        let db = db::open(std::path::Path::new(":memory:")).unwrap();
        for i in 0..5 {
            log(&db, "create", "peer", Some(&i.to_string()), &serde_json::Value::Null, None).unwrap();
        }
        let page = query(
            &db,
            AuditQuery {
                entity_type: None,
                entity_id: None,
                limit: 2,
                offset: 2,
            },
        )
        .unwrap();
        assert_eq!(page.len(), 2);
    }
}
