use crate::hal::{PinClaim, PinMode, SharedPins};
use bus_transport::MessageBus;
use device_registry::{
    Capability, DeviceDescriptor, DeviceIdentity, DriverConstructionError, DriverFault, LinkSession,
    Millis, NodeContext, PropertySpec, Topic,
};
use serde::Deserialize;

pub const DEVICE_TYPE: &str = "LEDS Traffic Light";

pub fn properties() -> Vec<PropertySpec> {
    Vec::new()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Lamps {
    #[serde(default)]
    pub r: bool,
    #[serde(default)]
    pub y: bool,
    #[serde(default)]
    pub g: bool,
}

impl Lamps {
    pub const OFF: Lamps = Lamps {
        r: false,
        y: false,
        g: false,
    };

    /// JSON object or one of `red`, `yellow`, `green`, `off`.
    pub fn parse(payload: &str) -> Option<Self> {
        let payload = payload.trim();
        if payload.starts_with('{') {
            return serde_json::from_str(payload).ok();
        }
        match payload.to_ascii_lowercase().as_str() {
            "red" => Some(Lamps { r: true, ..Self::OFF }),
            "yellow" => Some(Lamps { y: true, ..Self::OFF }),
            "green" => Some(Lamps { g: true, ..Self::OFF }),
            "off" => Some(Self::OFF),
            _ => None,
        }
    }
}

/// Three LEDs driven from the consumer. Dark while the consumer is away.
#[derive(Debug)]
pub struct TrafficLight {
    identity: DeviceIdentity,
    red: PinClaim,
    yellow: PinClaim,
    green: PinClaim,
    topic: String,
    link: LinkSession,
    lamps: Lamps,
}

impl TrafficLight {
    pub fn new(
        desc: &DeviceDescriptor,
        ctx: &NodeContext,
        pins: &SharedPins,
    ) -> Result<Self, DriverConstructionError> {
        let light = Self {
            identity: desc.identity(),
            red: PinClaim::acquire(pins, desc, "R", PinMode::Output)?,
            yellow: PinClaim::acquire(pins, desc, "Y", PinMode::Output)?,
            green: PinClaim::acquire(pins, desc, "G", PinMode::Output)?,
            topic: ctx.device_topic("traffic_light", desc.device_index),
            link: LinkSession::default(),
            lamps: Lamps::OFF,
        };
        light
            .apply(Lamps::OFF)
            .map_err(|f| DriverConstructionError::Hardware {
                identity: desc.identity(),
                reason: f.message,
            })?;
        Ok(light)
    }

    pub fn lamps(&self) -> Lamps {
        self.lamps
    }

    fn apply(&self, lamps: Lamps) -> Result<(), DriverFault> {
        self.red.write(&self.identity, lamps.r)?;
        self.yellow.write(&self.identity, lamps.y)?;
        self.green.write(&self.identity, lamps.g)
    }
}

impl Capability for TrafficLight {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn poll(&mut self, _now: Millis, _bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        Ok(())
    }

    fn describe_topics(&self) -> Vec<Topic> {
        vec![Topic::inbound(self.topic.clone(), r#"{"r":true,"y":false,"g":false}"#)]
    }

    fn on_link_established(&mut self, session: u32, bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        if self.link.begin(session) {
            bus.subscribe(&self.topic)
                .map_err(|e| DriverFault::new(&self.identity, format!("subscribe {}: {e}", self.topic)))?;
        }
        Ok(())
    }

    fn on_consumer_unavailable(&mut self, _bus: &mut dyn MessageBus) {
        match self.apply(Lamps::OFF) {
            Ok(()) => self.lamps = Lamps::OFF,
            Err(fault) => tracing::error!(%fault, "traffic light could not be switched off"),
        }
    }

    fn on_message(
        &mut self,
        topic: &str,
        payload: &str,
        _now: Millis,
        _bus: &mut dyn MessageBus,
    ) -> Result<bool, DriverFault> {
        if topic != self.topic {
            return Ok(false);
        }
        let lamps = Lamps::parse(payload).ok_or_else(|| {
            DriverFault::new(&self.identity, format!("unknown traffic light command '{payload}'"))
        })?;
        self.apply(lamps)?;
        self.lamps = lamps;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hardware;
    use bus_transport::MockBus;
    use device_registry::{PinAssignment, Properties};

    fn descriptor() -> DeviceDescriptor {
        let pin = |name: &str, gpio| PinAssignment {
            name: name.into(),
            gpio,
        };
        DeviceDescriptor {
            device_type: DEVICE_TYPE.into(),
            device_index: 0,
            is_enabled: true,
            pins: vec![pin("R", 25), pin("Y", 26), pin("G", 27)],
            properties: Properties::new(),
        }
    }

    #[test]
    fn command_forms() {
        assert_eq!(Lamps::parse("red"), Some(Lamps { r: true, ..Lamps::OFF }));
        assert_eq!(Lamps::parse(r#"{"y":true,"g":true}"#), Some(Lamps { r: false, y: true, g: true }));
        assert_eq!(Lamps::parse("blue"), None);
    }

    #[test]
    fn drives_pins_and_goes_dark_in_safe_mode() {
        let (hw, sim, _) = Hardware::simulated();
        let mut light = TrafficLight::new(&descriptor(), &NodeContext::new("iotzoo/esp32/AA"), &hw.pins).unwrap();
        let mut bus = MockBus::new();
        bus.connect();
        light.on_link_established(1, &mut bus).unwrap();
        assert!(bus.is_subscribed("iotzoo/esp32/AA/traffic_light/0"));

        assert!(light.on_message("iotzoo/esp32/AA/traffic_light/0", "green", 0, &mut bus).unwrap());
        assert!(sim.lock().unwrap().level(27));
        assert!(!light.on_message("iotzoo/esp32/AA/other", "green", 0, &mut bus).unwrap());
        assert!(light.on_message("iotzoo/esp32/AA/traffic_light/0", "purple", 0, &mut bus).is_err());

        light.on_consumer_unavailable(&mut bus);
        assert_eq!(light.lamps(), Lamps::OFF);
        let sim = sim.lock().unwrap();
        assert!(!sim.level(25) && !sim.level(26) && !sim.level(27));
    }
}
