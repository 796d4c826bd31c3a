//! Endpoint-group DNS reconciler and retry queue.
//!
//! Diffs desired vs existing A/AAAA records, creates before deleting,
//! pins `proxied=false` on every write, and queues failed operations for
//! a lazily-started worker that retries at a fixed cadence up to 5 times.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::db::Db;
use crate::error::CoreError;
use crate::models::EndpointGroup;
use crate::repo::{audit_repo, config_node_repo, endpoint_group_repo, interface_repo, node_repo};

const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub id: String,
    pub record_type: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct CfError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct CfEnvelope<T> {
    success: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    errors: Vec<CfError>,
}

#[derive(Debug, Deserialize)]
struct CfRecord {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
}

impl<T> CfEnvelope<T> {
    fn into_result(self, detail: &str) -> Result<T, CoreError> {
        if self.success {
            self.result
                .ok_or_else(|| CoreError::DnsProviderError(format!("{detail}: empty result")))
        } else {
            let msg = self
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "unknown DNS provider error".into());
            Err(CoreError::DnsProviderError(format!("{detail}: {msg}")))
        }
    }
}

/// REST client for a Cloudflare-shaped DNS provider: bearer auth,
/// `/zones/{zone_id}/dns_records[/{id}]`, `proxied` hard-pinned to `false`.
#[derive(Clone)]
pub struct DnsProviderClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl DnsProviderClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self {
            base_url: base_url.into(),
            token,
            http,
        }
    }

    fn auth_header(&self) -> Result<String, CoreError> {
        self.token
            .clone()
            .map(|t| format!("Bearer {t}"))
            .ok_or_else(|| CoreError::DnsProviderError("DNS provider token not configured".into()))
    }

    pub async fn list_records(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
    ) -> Result<Vec<DnsRecord>, CoreError> {
        let auth = self.auth_header()?;
        let url = format!(
            "{}/zones/{zone_id}/dns_records?name={name}&type={record_type}",
            self.base_url
        );
        let resp = self
            .http
            .get(&url)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| CoreError::DnsProviderError(e.to_string()))?;
        let envelope: CfEnvelope<Vec<CfRecord>> = resp
            .json()
            .await
            .map_err(|e| CoreError::DnsProviderError(format!("invalid list response: {e}")))?;
        let records = envelope.into_result("list_dns_records")?;
        Ok(records
            .into_iter()
            .map(|r| DnsRecord {
                id: r.id,
                record_type: r.record_type,
                content: r.content,
            })
            .collect())
    }

    pub async fn create_record(
        &self,
        zone_id: &str,
        record_type: &str,
        name: &str,
        content: &str,
        ttl: i64,
    ) -> Result<(), CoreError> {
        let auth = self.auth_header()?;
        let url = format!("{}/zones/{zone_id}/dns_records", self.base_url);
        let body = serde_json::json!({
            "type": record_type,
            "name": name,
            "content": content,
            "ttl": ttl,
            "proxied": false,
        });
        let resp = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::DnsProviderError(e.to_string()))?;
        let envelope: CfEnvelope<CfRecord> = resp
            .json()
            .await
            .map_err(|e| CoreError::DnsProviderError(format!("invalid create response: {e}")))?;
        envelope.into_result("create_dns_record")?;
        info!("created DNS record: {record_type} {name} -> {content}");
        Ok(())
    }

    pub async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), CoreError> {
        let auth = self.auth_header()?;
        let url = format!("{}/zones/{zone_id}/dns_records/{record_id}", self.base_url);
        let resp = self
            .http
            .delete(&url)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| CoreError::DnsProviderError(e.to_string()))?;
        let envelope: CfEnvelope<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| CoreError::DnsProviderError(format!("invalid delete response: {e}")))?;
        envelope.into_result("delete_dns_record")?;
        info!("deleted DNS record {record_id}");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum RetryOp {
    Create {
        zone_id: String,
        record_type: String,
        name: String,
        content: String,
        ttl: i64,
    },
    Delete {
        zone_id: String,
        record_id: String,
    },
}

struct RetryItem {
    op: RetryOp,
    retry_count: u32,
}

/// FIFO retry queue: a single worker drains it at a fixed cadence, started
/// lazily on first enqueue, self-terminating once drained. In-memory only —
/// queue loss across a restart is an accepted tradeoff (an operator can
/// re-trigger a manual sync).
#[derive(Clone)]
pub struct DnsRetryQueue {
    items: Arc<Mutex<VecDeque<RetryItem>>>,
    running: Arc<AtomicBool>,
    client: DnsProviderClient,
    interval: Duration,
}

impl DnsRetryQueue {
    pub fn new(client: DnsProviderClient, interval: Duration) -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::new())),
            running: Arc::new(AtomicBool::new(false)),
            client,
            interval,
        }
    }

    pub fn enqueue(&self, op: RetryOp) {
        {
            let mut q = self.items.lock().unwrap();
            q.push_back(RetryItem { op, retry_count: 0 });
        }
        info!("queued DNS operation for retry");
        self.ensure_worker();
    }

    fn ensure_worker(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let items = self.items.clone();
        let running = self.running.clone();
        let client = self.client.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let next = { items.lock().unwrap().pop_front() };
                let Some(mut item) = next else {
                    running.store(false, Ordering::Release);
                    return;
                };
                let result = match &item.op {
                    RetryOp::Create {
                        zone_id,
                        record_type,
                        name,
                        content,
                        ttl,
                    } => {
                        client
                            .create_record(zone_id, record_type, name, content, *ttl)
                            .await
                    }
                    RetryOp::Delete { zone_id, record_id } => {
                        client.delete_record(zone_id, record_id).await
                    }
                };
                if let Err(e) = result {
                    item.retry_count += 1;
                    if item.retry_count < MAX_RETRIES {
                        warn!("DNS retry {}/{MAX_RETRIES} failed: {e}", item.retry_count);
                        items.lock().unwrap().push_back(item);
                    } else {
                        warn!("DNS operation dropped after {MAX_RETRIES} retries: {e}");
                    }
                }
            }
        });
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct DnsSyncReport {
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
    pub skipped_reason: Option<String>,
}

fn parse_endpoint_host(endpoint: &str) -> Option<IpAddr> {
    let host = endpoint.rsplit_once(':').map(|(h, _)| h).unwrap_or(endpoint);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.parse().ok()
}

/// Reconciles the DNS records for `config_name`'s `EndpointGroup` against the
/// live healthy set of assigned nodes. `on_background=false` (a manual
/// trigger) propagates the first provider error to the caller;
/// `on_background=true` enqueues failures on `retry_queue` and continues.
pub async fn sync_config_dns(
    db: &Db,
    client: &DnsProviderClient,
    retry_queue: &DnsRetryQueue,
    config_name: &str,
    on_background: bool,
) -> Result<DnsSyncReport, CoreError> {
    let group = endpoint_group_repo::get_by_config_name(db, config_name)?
        .ok_or_else(|| CoreError::NotFound(format!("no endpoint group for config '{config_name}'")))?;

    let mut report = DnsSyncReport::default();

    let (desired_v4, desired_v6) = desired_ips(db, &group)?;
    let total = desired_v4.len() + desired_v6.len();
    if total < group.min_nodes as usize {
        let reason = format!(
            "only {total} publishable node IP(s), below min_nodes={}; skipping",
            group.min_nodes
        );
        warn!("{reason}");
        report.skipped_reason = Some(reason);
        return Ok(report);
    }

    apply_family(
        client,
        retry_queue,
        &group,
        "A",
        &desired_v4,
        on_background,
        &mut report,
    )
    .await?;
    apply_family(
        client,
        retry_queue,
        &group,
        "AAAA",
        &desired_v6,
        on_background,
        &mut report,
    )
    .await?;

    let mut all_ips: Vec<String> = desired_v4.iter().map(|ip| ip.to_string()).collect();
    all_ips.extend(desired_v6.iter().map(|ip| ip.to_string()));
    audit_repo::log(
        db,
        "dns_synced",
        "endpoint_group",
        Some(config_name),
        &serde_json::json!({ "ips": all_ips }),
        None,
    )?;

    Ok(report)
}

fn desired_ips(
    db: &Db,
    group: &EndpointGroup,
) -> Result<(HashSet<std::net::Ipv4Addr>, HashSet<std::net::Ipv6Addr>), CoreError> {
    let mut v4 = HashSet::new();
    let mut v6 = HashSet::new();

    for assignment in config_node_repo::list_for_config(db, &group.config_name)? {
        if group.publish_only_healthy && !assignment.is_healthy {
            continue;
        }
        let Some(node) = node_repo::get_by_id(db, &assignment.node_id)? else {
            continue;
        };
        if !node.enabled {
            continue;
        }
        let Some(ip) = interface_repo::list_for_node(db, &node.id)?
            .into_iter()
            .find(|i| i.enabled)
            .and_then(|i| parse_endpoint_host(&i.endpoint))
        else {
            continue;
        };
        match ip {
            IpAddr::V4(a) => {
                v4.insert(a);
            }
            IpAddr::V6(a) => {
                v6.insert(a);
            }
        }
    }

    Ok((v4, v6))
}

async fn apply_family<T: ToString + std::cmp::Eq + std::hash::Hash>(
    client: &DnsProviderClient,
    retry_queue: &DnsRetryQueue,
    group: &EndpointGroup,
    record_type: &str,
    desired: &HashSet<T>,
    on_background: bool,
    report: &mut DnsSyncReport,
) -> Result<(), CoreError> {
    let existing = client
        .list_records(&group.cloudflare_zone_id, &group.cloudflare_record_name, record_type)
        .await?;

    let mut existing_by_content: std::collections::HashMap<String, String> = existing
        .into_iter()
        .map(|r| (r.content, r.id))
        .collect();

    for ip in desired {
        let content = ip.to_string();
        if existing_by_content.remove(&content).is_some() {
            report.unchanged += 1;
            continue;
        }
        let res = client
            .create_record(
                &group.cloudflare_zone_id,
                record_type,
                &group.cloudflare_record_name,
                &content,
                group.ttl,
            )
            .await;
        match res {
            Ok(()) => report.created.push(content),
            Err(e) if on_background => {
                retry_queue.enqueue(RetryOp::Create {
                    zone_id: group.cloudflare_zone_id.clone(),
                    record_type: record_type.to_string(),
                    name: group.cloudflare_record_name.clone(),
                    content,
                    ttl: group.ttl,
                });
                warn!("background DNS create failed, queued for retry: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    // whatever's left in existing_by_content is no longer desired
    for (content, record_id) in existing_by_content {
        let res = client.delete_record(&group.cloudflare_zone_id, &record_id).await;
        match res {
            Ok(()) => report.deleted.push(content),
            Err(e) if on_background => {
                retry_queue.enqueue(RetryOp::Delete {
                    zone_id: group.cloudflare_zone_id.clone(),
                    record_id,
                });
                warn!("background DNS delete failed, queued for retry: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_host_from_endpoint() {
        assert_eq!(
            parse_endpoint_host("203.0.113.5:51820"),
            Some("203.0.113.5".parse().unwrap())
        );
    }

    #[test]
    fn parses_bracketed_ipv6_host_from_endpoint() {
        assert_eq!(
            parse_endpoint_host("[2001:db8::1]:51820"),
            Some("2001:db8::1".parse().unwrap())
        );
    }

    #[test]
    fn rejects_hostnames() {
        assert_eq!(parse_endpoint_host("vpn.example.com:51820"), None);
    }
}
