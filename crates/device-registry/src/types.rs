use core::fmt;
use serde::{Deserialize, Serialize};

/// Milliseconds since boot. The only clock the control plane reasons with.
pub type Millis = u64;

/// Stable identity of one driver: its family tag plus the caller-assigned index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_type: String,
    pub device_index: i32,
}

impl DeviceIdentity {
    pub fn new(device_type: impl Into<String>, device_index: i32) -> Self {
        Self {
            device_type: device_type.into(),
            device_index,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.device_type, self.device_index)
    }
}

/// One validated manifest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub device_type: String,
    pub device_index: i32,
    pub is_enabled: bool,
    pub pins: Vec<PinAssignment>,
    pub properties: Properties,
}

impl DeviceDescriptor {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.device_type.clone(), self.device_index)
    }

    /// GPIO assigned to a named pin (case-insensitive).
    pub fn pin(&self, name: &str) -> Option<i32> {
        self.pins
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.gpio)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinAssignment {
    pub name: String,
    pub gpio: i32,
}

/// A property value after coercion against the family's schema.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl PropValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Name → value mapping that keeps manifest order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(Vec<(String, PropValue)>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Insert or replace, keeping the position of an existing entry.
    pub fn set(&mut self, name: impl Into<String>, value: PropValue) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Direction of a topic from the node's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The node subscribes and receives.
    Inbound,
    /// The node publishes.
    Outbound,
}

impl Direction {
    /// Wire code used in discovery messages. The consumer counts directions from
    /// its own side: 0 = consumer receives (node sends), 1 = consumer sends.
    pub fn wire_code(self) -> u8 {
        match self {
            Direction::Outbound => 0,
            Direction::Inbound => 1,
        }
    }
}

/// One channel a driver (or the node itself) offers to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub example: String,
    pub direction: Direction,
    pub persist: bool,
}

impl Topic {
    pub fn outbound(name: impl Into<String>, example: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            example: example.into(),
            direction: Direction::Outbound,
            persist: false,
        }
    }

    pub fn inbound(name: impl Into<String>, example: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            example: example.into(),
            direction: Direction::Inbound,
            persist: false,
        }
    }

    /// Ask the consumer to keep a history of this topic.
    pub fn persisted(mut self) -> Self {
        self.persist = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_display() {
        assert_eq!(DeviceIdentity::new("Switch", 3).to_string(), "Switch#3");
    }

    #[test]
    fn properties_lookup_is_case_insensitive_and_set_replaces() {
        let mut props = Properties::new();
        props.set("Interval", PropValue::Int(5000));
        props.set("Resolution", PropValue::Int(10));
        props.set("interval", PropValue::Int(6000));
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("INTERVAL").and_then(PropValue::as_i64), Some(6000));
        let names: Vec<&str> = props.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Interval", "Resolution"]);
    }

    #[test]
    fn direction_wire_codes_are_consumer_relative() {
        assert_eq!(Direction::Outbound.wire_code(), 0);
        assert_eq!(Direction::Inbound.wire_code(), 1);
    }
}
