use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub bind_addr: SocketAddr,
    pub shared_secret: String,
    pub config_dir: PathBuf,
    pub wg_bin: String,
    pub wg_quick_bin: String,
}

impl AgentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = env::var("WGFLEET_AGENT_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let bind_addr = format!("0.0.0.0:{port}").parse()?;

        let shared_secret = env::var("WGFLEET_AGENT_SECRET")
            .map_err(|_| anyhow::anyhow!("WGFLEET_AGENT_SECRET must be set"))?;

        let config_dir = env::var("WG_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/wireguard"));

        let wg_bin = env::var("WG_BIN").unwrap_or_else(|_| "wg".into());
        let wg_quick_bin = env::var("WG_QUICK_BIN").unwrap_or_else(|_| "wg-quick".into());

        Ok(Self {
            bind_addr,
            shared_secret,
            config_dir,
            wg_bin,
            wg_quick_bin,
        })
    }

    pub fn config_path(&self, interface: &str) -> PathBuf {
        self.config_dir.join(format!("{interface}.conf"))
    }
}
