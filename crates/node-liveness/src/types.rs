use serde::{Deserialize, Serialize};

/// Milliseconds since boot.
pub type Millis = u64;

/// Heartbeat intervals below this are refused.
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// When the acknowledgement indicator is lit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckLedMode {
    Off,
    AlwaysOn,
    #[default]
    DayOnly,
}

impl AckLedMode {
    /// Numeric code used on the wire and in persisted settings.
    pub fn code(self) -> u8 {
        match self {
            AckLedMode::Off => 0,
            AckLedMode::AlwaysOn => 1,
            AckLedMode::DayOnly => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(AckLedMode::Off),
            1 => Some(AckLedMode::AlwaysOn),
            2 => Some(AckLedMode::DayOnly),
            _ => None,
        }
    }

    pub fn lights_for(self, day: DayMode) -> bool {
        match self {
            AckLedMode::Off => false,
            AckLedMode::AlwaysOn => true,
            AckLedMode::DayOnly => day == DayMode::Day,
        }
    }
}

/// Externally pushed day/night flag. Nothing guarantees it is ever sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DayMode {
    #[default]
    Unknown,
    Day,
    Night,
}

impl DayMode {
    /// `True` and `1` mean day; anything else is night.
    pub fn from_flag(payload: &str) -> Self {
        match payload.trim() {
            "True" | "true" | "1" => DayMode::Day,
            _ => DayMode::Night,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessConfig {
    pub heartbeat_interval_ms: u64,
    pub ack_led_mode: AckLedMode,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 15_000,
            ack_led_mode: AckLedMode::default(),
        }
    }
}

impl LivenessConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval_ms < MIN_HEARTBEAT_INTERVAL_MS {
            return Err(format!(
                "heartbeat interval {} ms is below the {} ms minimum",
                self.heartbeat_interval_ms, MIN_HEARTBEAT_INTERVAL_MS
            ));
        }
        Ok(())
    }
}

/// Snapshot of everything the liveness protocol tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessState {
    pub transport_connected: bool,
    pub last_heartbeat_sent_at: Option<Millis>,
    pub last_ack_received_at: Millis,
    pub heartbeat_interval_ms: u64,
    pub consumer_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn led_mode_codes() {
        for mode in [AckLedMode::Off, AckLedMode::AlwaysOn, AckLedMode::DayOnly] {
            assert_eq!(AckLedMode::from_code(mode.code() as i64), Some(mode));
        }
        assert_eq!(AckLedMode::from_code(7), None);
    }

    #[test]
    fn day_only_needs_a_known_day() {
        assert!(!AckLedMode::DayOnly.lights_for(DayMode::Unknown));
        assert!(!AckLedMode::DayOnly.lights_for(DayMode::Night));
        assert!(AckLedMode::DayOnly.lights_for(DayMode::Day));
        assert!(AckLedMode::AlwaysOn.lights_for(DayMode::Unknown));
        assert!(!AckLedMode::Off.lights_for(DayMode::Day));
    }

    #[test]
    fn day_flag_parsing() {
        assert_eq!(DayMode::from_flag("True"), DayMode::Day);
        assert_eq!(DayMode::from_flag("1"), DayMode::Day);
        assert_eq!(DayMode::from_flag("False"), DayMode::Night);
        assert_eq!(DayMode::from_flag(""), DayMode::Night);
    }

    #[test]
    fn config_defaults_and_validation() {
        let cfg = LivenessConfig::default();
        assert_eq!(cfg.heartbeat_interval_ms, 15_000);
        assert_eq!(cfg.ack_led_mode, AckLedMode::DayOnly);
        assert!(cfg.validate().is_ok());
        let bad = LivenessConfig {
            heartbeat_interval_ms: 0,
            ..cfg
        };
        assert!(bad.validate().is_err());
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"day_only\""));
    }
}
