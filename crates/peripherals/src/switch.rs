use crate::hal::{PinClaim, PinMode, SharedPins};
use crate::publish;
use bus_transport::MessageBus;
use device_registry::{
    Capability, DeviceDescriptor, DeviceIdentity, DriverConstructionError, DriverFault, Millis,
    NodeContext, PropertySpec, Topic,
};

pub const DEVICE_TYPE: &str = "Switch";

pub fn properties() -> Vec<PropertySpec> {
    vec![PropertySpec::int("DebounceMs", 50, 10, 1_000)]
}

/// Digital input reported as `1`/`0` once the level has been stable for the
/// debounce time.
#[derive(Debug)]
pub struct Switch {
    identity: DeviceIdentity,
    pin: PinClaim,
    topic: String,
    debounce_ms: u64,
    candidate: Option<(bool, Millis)>,
    reported: Option<bool>,
}

impl Switch {
    pub fn new(
        desc: &DeviceDescriptor,
        ctx: &NodeContext,
        pins: &SharedPins,
    ) -> Result<Self, DriverConstructionError> {
        let debounce_ms = desc.require_int("DebounceMs")?;
        let pin = PinClaim::acquire(pins, desc, "Data", PinMode::InputPullUp)?;
        Ok(Self {
            identity: desc.identity(),
            topic: ctx.device_topic("switch", desc.device_index),
            pin,
            debounce_ms: u64::try_from(debounce_ms).unwrap_or(0),
            candidate: None,
            reported: None,
        })
    }
}

impl Capability for Switch {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn poll(&mut self, now: Millis, bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        let level = self.pin.read(&self.identity)?;
        let since = match self.candidate {
            Some((candidate, since)) if candidate == level => since,
            _ => {
                self.candidate = Some((level, now));
                now
            }
        };
        let stable = now.saturating_sub(since) >= self.debounce_ms || self.reported.is_none();
        if stable && self.reported != Some(level) {
            let payload = if level { "1" } else { "0" };
            if publish(bus, &self.identity, &self.topic, payload, false)? {
                self.reported = Some(level);
            }
        }
        Ok(())
    }

    fn describe_topics(&self) -> Vec<Topic> {
        vec![Topic::outbound(self.topic.clone(), "1").persisted()]
    }

    fn on_link_established(&mut self, _session: u32, _bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        // Resend the current level on the new session.
        self.reported = None;
        Ok(())
    }

    fn on_consumer_unavailable(&mut self, _bus: &mut dyn MessageBus) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hardware;
    use bus_transport::MockBus;
    use device_registry::{PinAssignment, PropValue, Properties};

    fn descriptor(gpio: i32) -> DeviceDescriptor {
        let mut properties = Properties::new();
        properties.set("DebounceMs", PropValue::Int(50));
        DeviceDescriptor {
            device_type: DEVICE_TYPE.into(),
            device_index: 0,
            is_enabled: true,
            pins: vec![PinAssignment {
                name: "Data".into(),
                gpio,
            }],
            properties,
        }
    }

    #[test]
    fn reports_initial_level_then_debounced_changes() {
        let (hw, sim, _) = Hardware::simulated();
        let ctx = NodeContext::new("iotzoo/esp32/AA");
        let mut sw = Switch::new(&descriptor(19), &ctx, &hw.pins).unwrap();
        let mut bus = MockBus::new();
        bus.connect();

        sw.poll(0, &mut bus).unwrap();
        sim.lock().unwrap().set_input(19, false);
        sw.poll(10, &mut bus).unwrap();
        sim.lock().unwrap().set_input(19, true);
        sw.poll(20, &mut bus).unwrap();
        sim.lock().unwrap().set_input(19, false);
        sw.poll(30, &mut bus).unwrap();
        sw.poll(79, &mut bus).unwrap();
        sw.poll(80, &mut bus).unwrap();

        let payloads: Vec<_> = bus.published().iter().map(|m| m.payload.as_str()).collect();
        assert_eq!(payloads, vec!["1", "0"]);
        assert!(bus.published().iter().all(|m| m.topic == "iotzoo/esp32/AA/switch/0"));
    }

    #[test]
    fn nothing_is_lost_while_disconnected() {
        let (hw, _, _) = Hardware::simulated();
        let mut sw = Switch::new(&descriptor(19), &NodeContext::new("b"), &hw.pins).unwrap();
        let mut bus = MockBus::new();
        sw.poll(0, &mut bus).unwrap();
        bus.connect();
        sw.poll(100, &mut bus).unwrap();
        assert_eq!(bus.published().len(), 1);
    }

    #[test]
    fn out_of_range_gpio_is_invalid_pin() {
        let (hw, _, _) = Hardware::simulated();
        let err = Switch::new(&descriptor(99), &NodeContext::new("b"), &hw.pins).unwrap_err();
        assert!(matches!(err, DriverConstructionError::InvalidPin { gpio: 99, .. }));
    }
}
