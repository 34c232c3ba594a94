use crate::error::ConfigError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub update_interval_secs: u64,
    pub timeout_multiplier: u32,
    pub bind_address: Ipv4Addr,
    pub recv_buffer_size: usize,
    pub control_port: Option<u16>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 30,
            timeout_multiplier: 3,     // three missed updates
            bind_address: Ipv4Addr::UNSPECIFIED,
            recv_buffer_size: 65536,
            control_port: None,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.update_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Silence after which a neighbor is considered gone.
    pub fn neighbor_timeout(&self) -> chrono::Duration {
        let secs = self
            .update_interval_secs
            .saturating_mul(self.timeout_multiplier.max(1) as u64);
        chrono::Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64)
    }
}
