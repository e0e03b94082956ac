use crate::NodeIdentity;
use anyhow::{Context, Result};
use node_liveness::{AckLedMode, LivenessConfig, DEFAULT_STALL_CEILING_MS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Static node configuration. Persisted settings override the identity and
/// liveness fields at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub namespace_name: String,
    pub project_name: String,
    pub board_type: String,
    pub mac_address: String,
    pub ip_address: String,
    pub broker_ip: String,
    pub firmware_version: String,
    pub heartbeat_interval_ms: u64,
    pub ack_led_mode: AckLedMode,
    pub discovery_ceiling_bytes: usize,
    pub max_batch_topics: usize,
    pub manifest_capacity_bytes: usize,
    pub stall_ceiling_ms: u64,
    pub loop_period_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            namespace_name: "iotzoo".to_string(),
            project_name: String::new(),
            board_type: "esp32".to_string(),
            mac_address: "00:00:00:00:00:00".to_string(),
            ip_address: "127.0.0.1".to_string(),
            broker_ip: "127.0.0.1".to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            heartbeat_interval_ms: 15_000,
            ack_led_mode: AckLedMode::DayOnly,
            discovery_ceiling_bytes: 16 * 1024,
            max_batch_topics: 64,
            manifest_capacity_bytes: device_registry::DEFAULT_MANIFEST_CAPACITY,
            stall_ceiling_ms: DEFAULT_STALL_CEILING_MS,
            loop_period_ms: 100,
        }
    }
}

impl NodeConfig {
    /// Load from `path`, writing the defaults there first if the file is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading config: {}", path.display()))?;
            let config: Self = serde_json::from_str(&contents)
                .with_context(|| format!("parsing config: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing config: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.liveness()
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;
        if self.board_type.trim().is_empty() || self.mac_address.trim().is_empty() {
            anyhow::bail!("invalid config: board_type and mac_address must not be empty");
        }
        if self.discovery_ceiling_bytes == 0 || self.max_batch_topics == 0 {
            anyhow::bail!("invalid config: discovery limits must be positive");
        }
        Ok(())
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity {
            namespace_name: self.namespace_name.clone(),
            project_name: self.project_name.clone(),
            board_type: self.board_type.clone(),
            mac_address: self.mac_address.clone(),
            ip_address: self.ip_address.clone(),
            broker_ip: self.broker_ip.clone(),
            firmware_version: self.firmware_version.clone(),
        }
    }

    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            ack_led_mode: self.ack_led_mode,
        }
    }
}
