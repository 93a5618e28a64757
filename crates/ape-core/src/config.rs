use std::path::Path;

use ape_agent::{AgentConfig, ConfigError};
use ape_server::ServerConfig;
use serde::{Deserialize, Serialize};

use crate::limits::SessionLimits;

/// Everything a driver needs to run one exploration session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub limits: SessionLimits,
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.agent.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
