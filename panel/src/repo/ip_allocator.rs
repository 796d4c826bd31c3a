use std::net::IpAddr;

use ipnet::Ipv4Net;
use rusqlite::params;

use crate::db::Db;
use crate::error::CoreError;

const MAX_RETRIES: u32 = 3;

/// Allocates the next free host address out of `pool_cidr` for `node_id`,
/// reserving the first usable host as the interface gateway. Retries a
/// handful of times on a concurrent-insert race before giving up as
/// contended.
pub fn allocate(db: &Db, node_id: &str, peer_id: &str, pool_cidr: &str) -> Result<String, CoreError> {
    let net: Ipv4Net = pool_cidr
        .parse()
        .map_err(|_| CoreError::Validation(format!("invalid pool cidr: {pool_cidr}")))?;

    let taken = allocated_set(db, node_id)?;

    let candidates: Vec<IpAddr> = net
        .hosts()
        .skip(1) // first usable host reserved as gateway
        .map(IpAddr::V4)
        .filter(|ip| !taken.contains(&ip.to_string()))
        .collect();

    if candidates.is_empty() {
        return Err(CoreError::IpPoolExhausted);
    }

    let mut conflicts = 0;
    for ip in candidates.iter().take(MAX_RETRIES as usize) {
        let conn = db.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO ip_allocations (node_id, ip_address, peer_id) VALUES (?1, ?2, ?3)",
            params![node_id, ip.to_string(), peer_id],
        );
        drop(conn);
        match result {
            Ok(_) => return Ok(ip.to_string()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // someone else took this address between our read and write; try the next
                conflicts += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if conflicts > 0 {
        Err(CoreError::IpPoolContended)
    } else {
        Err(CoreError::IpPoolExhausted)
    }
}

pub fn release(db: &Db, peer_id: &str) -> Result<(), CoreError> {
    let conn = db.lock().unwrap();
    conn.execute(
        "DELETE FROM ip_allocations WHERE peer_id = ?1",
        params![peer_id],
    )?;
    Ok(())
}

pub fn allocated_set(db: &Db, node_id: &str) -> Result<std::collections::HashSet<String>, CoreError> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare("SELECT ip_address FROM ip_allocations WHERE node_id = ?1")?;
    let rows = stmt
        .query_map(params![node_id], |r| r.get::<_, String>(0))?
        .collect::<Result<std::collections::HashSet<_>, _>>()?;
    Ok(rows)
}

pub fn pool_stats(db: &Db, node_id: &str, pool_cidr: &str) -> Result<(usize, usize), CoreError> {
    let net: Ipv4Net = pool_cidr
        .parse()
        .map_err(|_| CoreError::Validation(format!("invalid pool cidr: {pool_cidr}")))?;
    let total = net.hosts().count().saturating_sub(1);
    let used = allocated_set(db, node_id)?.len();
    Ok((used, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::repo::node_repo::{self, NewNode};
    use crate::repo::peer_repo::{self, NewPeer};

    fn setup() -> (Db, String) {
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
        (db, node_id)
    }

    fn make_peer(db: &Db, node_id: &str, pk: &str) -> String {
        peer_repo::create(
            db,
            NewPeer {
                node_id: node_id.to_string(),
                interface_name: "wg0".into(),
                config_name: "wg0".into(),
                public_key: pk.into(),
                allowed_ips: vec!["0.0.0.0/32".into()],
                preshared_key: None,
                persistent_keepalive: 0,
                name: None,
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn allocates_first_non_gateway_host() {
        let (db, node_id) = setup();
        let peer = make_peer(&db, &node_id, "pk1");
        let ip = allocate(&db, &node_id, &peer, "10.8.0.0/29").unwrap();
        // .1 is reserved as gateway, first allocation should be .2
        assert_eq!(ip, "10.8.0.2");
    }

    #[test]
    fn slash_30_pool_has_exactly_one_allocatable_address() {
        let (db, node_id) = setup();
        let peer1 = make_peer(&db, &node_id, "pk1");
        let ip = allocate(&db, &node_id, &peer1, "10.9.0.0/30").unwrap();
        assert_eq!(ip, "10.9.0.2");

        let peer2 = make_peer(&db, &node_id, "pk2");
        let err = allocate(&db, &node_id, &peer2, "10.9.0.0/30").unwrap_err();
        assert!(matches!(err, CoreError::IpPoolExhausted));
    }

    #[test]
    fn release_frees_address_for_reuse() {
        let (db, node_id) = setup();
        let peer1 = make_peer(&db, &node_id, "pk1");
        let ip = allocate(&db, &node_id, &peer1, "10.9.1.0/30").unwrap();
        release(&db, &peer1).unwrap();

        let peer2 = make_peer(&db, &node_id, "pk2");
        let ip2 = allocate(&db, &node_id, &peer2, "10.9.1.0/30").unwrap();
        assert_eq!(ip, ip2);
    }
}
