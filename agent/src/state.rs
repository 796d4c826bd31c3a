use std::sync::Arc;
use std::time::Instant;

use crate::config::AgentConfig;

#[derive(Clone)]
pub struct AgentState {
    pub config: Arc<AgentConfig>,
    pub started_at: Instant,
}

impl AgentState {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}
