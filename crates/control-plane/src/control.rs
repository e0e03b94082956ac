use crate::messages::{AliveConfigRequest, IdentityUpdate, SettingsEntry};
use crate::{ControlPlaneError, NodeIdentity, Result};
use node_liveness::{AckLedMode, DayMode, LivenessConfig};

/// Topic names the node listens on, computed once per identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTopics {
    pub alive_ack: String,
    pub alive_config: String,
    pub status: String,
    pub mac_status: String,
    pub settings_load: String,
    pub settings_save: String,
    pub system: String,
    pub save_device_config: String,
    pub day_mode: String,
    pub save_identity: String,
}

impl ControlTopics {
    pub fn new(identity: &NodeIdentity) -> Self {
        Self {
            alive_ack: identity.topic("alive_ack"),
            alive_config: identity.topic("alive_config"),
            status: identity.topic("status"),
            mac_status: format!("{}/status", identity.mac_address),
            settings_load: identity.topic("settings/load"),
            settings_save: identity.topic("settings/save"),
            system: identity.topic("system"),
            save_device_config: identity.topic("save_device_config"),
            day_mode: format!("{}is_day_mode", identity.namespace_prefix()),
            save_identity: format!("{}/save_microcontroller_config", identity.mac_address),
        }
    }

    /// Every filter to subscribe on a new session.
    pub fn subscriptions(&self) -> [&str; 10] {
        [
            self.alive_ack.as_str(),
            self.alive_config.as_str(),
            self.status.as_str(),
            self.mac_status.as_str(),
            self.settings_load.as_str(),
            self.settings_save.as_str(),
            self.system.as_str(),
            self.save_device_config.as_str(),
            self.day_mode.as_str(),
            self.save_identity.as_str(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusRequest {
    DeviceConfig,
    Alive,
}

/// A decoded control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    AliveAck(String),
    AliveConfig(LivenessConfig),
    Status(StatusRequest),
    SettingsLoad(String),
    SettingsSave(SettingsEntry),
    Reboot,
    SaveManifest(String),
    DayMode(DayMode),
    SaveIdentity(IdentityUpdate),
    /// Empty payload on the identity topic: the retained message was cleared.
    IdentityCleared,
}

impl ControlCommand {
    /// `None` when the topic is not a control topic. Malformed payloads on
    /// control topics are errors.
    pub fn parse(topics: &ControlTopics, topic: &str, payload: &str) -> Option<Result<Self>> {
        let cmd = if topic == topics.alive_ack {
            Ok(ControlCommand::AliveAck(payload.to_string()))
        } else if topic == topics.alive_config {
            parse_alive_config(topic, payload)
        } else if topic == topics.status || topic == topics.mac_status {
            match payload.trim() {
                "device_config" => Ok(ControlCommand::Status(StatusRequest::DeviceConfig)),
                "alive" => Ok(ControlCommand::Status(StatusRequest::Alive)),
                other => Err(ControlPlaneError::Rejected(format!(
                    "Do not know what status you want: {other}"
                ))),
            }
        } else if topic == topics.settings_load {
            let key = payload.trim();
            if key.is_empty() {
                Err(ControlPlaneError::Rejected(
                    "settings/load requires a key".to_string(),
                ))
            } else {
                Ok(ControlCommand::SettingsLoad(key.to_string()))
            }
        } else if topic == topics.settings_save {
            serde_json::from_str::<SettingsEntry>(payload)
                .map_err(|e| ControlPlaneError::decode(topic, payload, e))
                .and_then(|entry| {
                    if entry.key.trim().is_empty() {
                        Err(ControlPlaneError::Rejected(
                            "settings/save requires a key".to_string(),
                        ))
                    } else {
                        Ok(ControlCommand::SettingsSave(entry))
                    }
                })
        } else if topic == topics.system {
            match payload.trim() {
                "reboot" => Ok(ControlCommand::Reboot),
                other => Err(ControlPlaneError::Rejected(format!(
                    "unknown system command: {other}"
                ))),
            }
        } else if topic == topics.save_device_config {
            if payload.trim().is_empty() {
                Err(ControlPlaneError::Rejected(
                    "save_device_config with empty manifest".to_string(),
                ))
            } else {
                Ok(ControlCommand::SaveManifest(payload.to_string()))
            }
        } else if topic == topics.day_mode {
            Ok(ControlCommand::DayMode(DayMode::from_flag(payload)))
        } else if topic == topics.save_identity {
            if payload.trim().is_empty() {
                Ok(ControlCommand::IdentityCleared)
            } else {
                serde_json::from_str::<IdentityUpdate>(payload)
                    .map(ControlCommand::SaveIdentity)
                    .map_err(|e| ControlPlaneError::decode(topic, payload, e))
            }
        } else {
            return None;
        };
        Some(cmd)
    }
}

fn parse_alive_config(topic: &str, payload: &str) -> Result<ControlCommand> {
    let req: AliveConfigRequest =
        serde_json::from_str(payload).map_err(|e| ControlPlaneError::decode(topic, payload, e))?;
    let ack_led_mode = AckLedMode::from_code(req.alive_ack_led_mode).ok_or_else(|| {
        ControlPlaneError::decode(topic, payload, format!("unknown ack LED mode {}", req.alive_ack_led_mode))
    })?;
    let config = LivenessConfig {
        heartbeat_interval_ms: req.alive_interval_ms,
        ack_led_mode,
    };
    config.validate().map_err(|e| ControlPlaneError::decode(topic, payload, e))?;
    Ok(ControlCommand::AliveConfig(config))
}
