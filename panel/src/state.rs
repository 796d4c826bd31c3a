use std::sync::Arc;

use crate::agent_client::AgentClientFactory;
use crate::config::PanelConfig;
use crate::db::Db;
use crate::dns::{DnsProviderClient, DnsRetryQueue};

/// Shared application state, passed through `axum::State` to every route
/// handler as a set of independently-clonable handles rather than one
/// single-blob lock.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub agents: Arc<AgentClientFactory>,
    pub dns_client: DnsProviderClient,
    pub dns_queue: Arc<DnsRetryQueue>,
    pub config: Arc<PanelConfig>,
}
