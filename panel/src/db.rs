use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub type Db = Arc<Mutex<Connection>>;

/// Opens the SQLite connection and runs schema setup: one connection behind
/// a mutex, passed through constructors.
pub fn open(path: &std::path::Path) -> anyhow::Result<Db> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            agent_url TEXT NOT NULL,
            auth_type TEXT NOT NULL DEFAULT 'hmac',
            shared_secret TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            weight INTEGER NOT NULL DEFAULT 100,
            max_peers INTEGER NOT NULL DEFAULT 0,
            group_id TEXT,
            health_json TEXT NOT NULL DEFAULT '{}',
            last_seen TEXT,
            override_listen_port INTEGER,
            override_dns TEXT,
            override_mtu INTEGER,
            override_keepalive INTEGER,
            override_endpoint_allowed_ip TEXT,
            override_post_up TEXT,
            override_pre_down TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS node_interfaces (
            id TEXT PRIMARY KEY,
            node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            interface_name TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            ip_pool_cidr TEXT NOT NULL,
            listen_port INTEGER,
            address TEXT,
            private_key TEXT NOT NULL DEFAULT '',
            post_up TEXT,
            pre_down TEXT,
            mtu INTEGER,
            dns TEXT,
            "table" TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(node_id, interface_name)
        );

        CREATE TABLE IF NOT EXISTS peers (
            id TEXT PRIMARY KEY,
            node_id TEXT NOT NULL REFERENCES nodes(id),
            interface_name TEXT NOT NULL,
            config_name TEXT NOT NULL,
            public_key TEXT NOT NULL UNIQUE,
            allowed_ips TEXT NOT NULL,
            preshared_key TEXT,
            persistent_keepalive INTEGER NOT NULL DEFAULT 0,
            name TEXT,
            latest_handshake INTEGER,
            transfer_rx INTEGER NOT NULL DEFAULT 0,
            transfer_tx INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS ip_allocations (
            node_id TEXT NOT NULL,
            ip_address TEXT NOT NULL,
            peer_id TEXT NOT NULL REFERENCES peers(id) ON DELETE CASCADE,
            PRIMARY KEY (node_id, ip_address)
        );

        CREATE TABLE IF NOT EXISTS config_nodes (
            id TEXT PRIMARY KEY,
            config_name TEXT NOT NULL,
            node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            is_healthy INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(config_name, node_id)
        );

        CREATE TABLE IF NOT EXISTS endpoint_groups (
            id TEXT PRIMARY KEY,
            config_name TEXT NOT NULL UNIQUE,
            domain TEXT NOT NULL,
            port INTEGER NOT NULL,
            cloudflare_zone_id TEXT NOT NULL,
            cloudflare_record_name TEXT NOT NULL,
            ttl INTEGER NOT NULL DEFAULT 60,
            proxied INTEGER NOT NULL DEFAULT 0,
            auto_migrate INTEGER NOT NULL DEFAULT 1,
            publish_only_healthy INTEGER NOT NULL DEFAULT 1,
            min_nodes INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL DEFAULT (datetime('now')),
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT,
            details TEXT,
            actor TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_peers_node_interface ON peers(node_id, interface_name);
        CREATE INDEX IF NOT EXISTS idx_config_nodes_config ON config_nodes(config_name);
        CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity_type, entity_id);
        "#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_initializes_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='nodes'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rejects_duplicate_ip_allocation() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO nodes (id, name, agent_url, shared_secret) VALUES ('n1','N1','http://x','s')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO peers (id, node_id, interface_name, config_name, public_key, allowed_ips) VALUES ('p1','n1','wg0','wg0','pk1','10.0.0.2/32')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO peers (id, node_id, interface_name, config_name, public_key, allowed_ips) VALUES ('p2','n1','wg0','wg0','pk2','10.0.0.2/32')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO ip_allocations (node_id, ip_address, peer_id) VALUES ('n1','10.0.0.2','p1')",
            [],
        )
        .unwrap();
        let err = conn
            .execute(
                "INSERT INTO ip_allocations (node_id, ip_address, peer_id) VALUES ('n1','10.0.0.2','p2')",
                [],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            rusqlite::Error::SqliteFailure(_, _)
        ));
    }
}
