use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Process configuration read once at startup and passed down through
/// constructors, rather than read ad hoc from the environment at each
/// call site.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    pub agent_timeout: Duration,
    pub dns_provider_base_url: String,
    pub dns_provider_token: Option<String>,
    pub health_poll_interval: Duration,
    pub health_poll_startup_delay: Duration,
    pub dns_retry_interval: Duration,
}

impl PanelConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = env::var("WGFLEET_PANEL_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9090);
        let bind_addr = format!("0.0.0.0:{port}").parse()?;

        let db_path = env::var("WGFLEET_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("wgfleet.db"));

        let agent_timeout = Duration::from_secs(
            env::var("WGFLEET_AGENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        );

        let dns_provider_base_url = env::var("WGFLEET_DNS_BASE_URL")
            .unwrap_or_else(|_| "https://api.cloudflare.com/client/v4".into());
        let dns_provider_token = env::var("WGFLEET_DNS_TOKEN").ok();

        let health_poll_interval = Duration::from_secs(
            env::var("WGFLEET_HEALTH_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        );
        let health_poll_startup_delay = Duration::from_secs(
            env::var("WGFLEET_HEALTH_POLL_STARTUP_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
        );
        let dns_retry_interval = Duration::from_secs(
            env::var("WGFLEET_DNS_RETRY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        );

        Ok(Self {
            bind_addr,
            db_path,
            agent_timeout,
            dns_provider_base_url,
            dns_provider_token,
            health_poll_interval,
            health_poll_startup_delay,
            dns_retry_interval,
        })
    }
}
