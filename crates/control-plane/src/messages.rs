//! JSON bodies exchanged with the consumer.

use crate::NodeIdentity;
use device_registry::Topic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node identity as sent in registrations and `i_am_lost`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MicrocontrollerInfo {
    pub namespace_name: String,
    pub project_name: String,
    pub board_type: String,
    pub ip_address: String,
    pub mac_address: String,
    pub ip_mqtt_broker: String,
    pub firmware_version: String,
    pub microcontroller_type: String,
}

impl From<&NodeIdentity> for MicrocontrollerInfo {
    fn from(id: &NodeIdentity) -> Self {
        Self {
            namespace_name: id.namespace_name.clone(),
            project_name: id.project_name.clone(),
            board_type: id.board_type.clone(),
            ip_address: id.ip_address.clone(),
            mac_address: id.mac_address.clone(),
            ip_mqtt_broker: id.broker_ip.clone(),
            firmware_version: id.firmware_version.clone(),
            microcontroller_type: id.board_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicRecord {
    pub topic: String,
    pub description: String,
    pub persist: bool,
    pub message_direction: u8,
}

impl From<&Topic> for TopicRecord {
    fn from(t: &Topic) -> Self {
        Self {
            topic: t.name.clone(),
            description: t.example.clone(),
            persist: t.persist,
            message_direction: t.direction.wire_code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Registration {
    #[serde(flatten)]
    pub microcontroller: MicrocontrollerInfo,
    pub known_topics: Vec<TopicRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeartbeatMicrocontroller {
    pub mac_address: String,
    pub ip_address: String,
    pub project_name: String,
    pub firmware_version: String,
    pub board_type: String,
}

impl From<&NodeIdentity> for HeartbeatMicrocontroller {
    fn from(id: &NodeIdentity) -> Self {
        Self {
            mac_address: id.mac_address.clone(),
            ip_address: id.ip_address.clone(),
            project_name: id.project_name.clone(),
            firmware_version: id.firmware_version.clone(),
            board_type: id.board_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AliveStats {
    pub alive_counter: u64,
    pub loop_counter: u64,
    pub loop_duration_ms: u64,
    pub reconnection_count: u32,
    pub alive_interval_ms: u64,
    pub alive_ack_led_enabled: u8,
    pub uptime_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Heartbeat {
    pub microcontroller: HeartbeatMicrocontroller,
    pub alive: AliveStats,
    pub supported_devices: BTreeMap<String, bool>,
}

/// Body of `alive_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliveConfigRequest {
    pub alive_interval_ms: u64,
    pub alive_ack_led_mode: i64,
}

/// Body of `settings/save`, and of the `settings/key` answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsEntry {
    pub key: String,
    #[serde(default)]
    pub data: String,
}

/// Body of `<mac>/save_microcontroller_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IdentityUpdate {
    #[serde(default)]
    pub namespace_name: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub ip_mqtt_broker: String,
}
