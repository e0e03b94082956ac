use crate::hal::{PinClaim, PinMode, SharedPins};
use crate::publish;
use bus_transport::MessageBus;
use device_registry::{
    Capability, DeviceDescriptor, DeviceIdentity, DriverConstructionError, DriverFault, LinkSession,
    Millis, NodeContext, PropertySpec, Topic,
};

pub const DEVICE_TYPE: &str = "28BY48Stepper";

const COILS: [&str; 4] = ["IN1", "IN2", "IN3", "IN4"];

/// Half-step coil pattern.
const SEQUENCE: [[bool; 4]; 8] = [
    [true, false, false, false],
    [true, true, false, false],
    [false, true, false, false],
    [false, true, true, false],
    [false, false, true, false],
    [false, false, true, true],
    [false, false, false, true],
    [true, false, false, true],
];

pub fn properties() -> Vec<PropertySpec> {
    vec![PropertySpec::int("StepsPerPoll", 8, 1, 64)]
}

/// Unipolar stepper on four coil pins. Moves are relative and spread over
/// several polls so the control loop is never held up.
#[derive(Debug)]
pub struct Stepper {
    identity: DeviceIdentity,
    coils: Vec<PinClaim>,
    steps_topic: String,
    position_topic: String,
    steps_per_poll: u64,
    link: LinkSession,
    phase: usize,
    position: i64,
    remaining: i64,
}

impl Stepper {
    pub fn new(
        desc: &DeviceDescriptor,
        ctx: &NodeContext,
        pins: &SharedPins,
    ) -> Result<Self, DriverConstructionError> {
        let steps_per_poll = desc.require_int("StepsPerPoll")?;
        let coils = COILS
            .iter()
            .map(|name| PinClaim::acquire(pins, desc, name, PinMode::Output))
            .collect::<Result<Vec<_>, _>>()?;
        let base = ctx.device_topic("stepper", desc.device_index);
        Ok(Self {
            identity: desc.identity(),
            coils,
            steps_topic: format!("{base}/steps"),
            position_topic: format!("{base}/position"),
            steps_per_poll: u64::try_from(steps_per_poll).unwrap_or(8),
            link: LinkSession::default(),
            phase: 0,
            position: 0,
            remaining: 0,
        })
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn is_moving(&self) -> bool {
        self.remaining != 0
    }

    fn energize(&self, pattern: [bool; 4]) -> Result<(), DriverFault> {
        for (coil, level) in self.coils.iter().zip(pattern) {
            coil.write(&self.identity, level)?;
        }
        Ok(())
    }

    fn release_coils(&self) -> Result<(), DriverFault> {
        self.energize([false; 4])
    }
}

impl Capability for Stepper {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn poll(&mut self, _now: Millis, bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        if self.remaining == 0 {
            return Ok(());
        }
        let steps = self.remaining.unsigned_abs().min(self.steps_per_poll);
        let forward = self.remaining > 0;
        for _ in 0..steps {
            self.phase = if forward {
                (self.phase + 1) % SEQUENCE.len()
            } else {
                (self.phase + SEQUENCE.len() - 1) % SEQUENCE.len()
            };
            self.energize(SEQUENCE[self.phase])?;
            let delta = if forward { 1 } else { -1 };
            self.position += delta;
            self.remaining -= delta;
        }
        if self.remaining == 0 {
            self.release_coils()?;
            publish(bus, &self.identity, &self.position_topic, &self.position.to_string(), false)?;
        }
        Ok(())
    }

    fn describe_topics(&self) -> Vec<Topic> {
        vec![
            Topic::inbound(self.steps_topic.clone(), "-2048"),
            Topic::outbound(self.position_topic.clone(), "4096"),
        ]
    }

    fn on_link_established(&mut self, session: u32, bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        if self.link.begin(session) {
            bus.subscribe(&self.steps_topic).map_err(|e| {
                DriverFault::new(&self.identity, format!("subscribe {}: {e}", self.steps_topic))
            })?;
        }
        Ok(())
    }

    fn on_consumer_unavailable(&mut self, _bus: &mut dyn MessageBus) {
        if self.remaining != 0 {
            tracing::warn!(identity = %self.identity, remaining = self.remaining, "aborting stepper move");
        }
        self.remaining = 0;
        if let Err(fault) = self.release_coils() {
            tracing::error!(%fault, "stepper coils could not be released");
        }
    }

    fn on_message(
        &mut self,
        topic: &str,
        payload: &str,
        _now: Millis,
        _bus: &mut dyn MessageBus,
    ) -> Result<bool, DriverFault> {
        if topic != self.steps_topic {
            return Ok(false);
        }
        let steps: i64 = payload.trim().parse().map_err(|_| {
            DriverFault::new(&self.identity, format!("'{payload}' is not a step count"))
        })?;
        self.remaining = self.remaining.saturating_add(steps);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hardware;
    use bus_transport::MockBus;
    use device_registry::{PinAssignment, PropValue, Properties};

    fn stepper(hw: &Hardware) -> Stepper {
        let mut properties = Properties::new();
        properties.set("StepsPerPoll", PropValue::Int(8));
        let desc = DeviceDescriptor {
            device_type: DEVICE_TYPE.into(),
            device_index: 0,
            is_enabled: true,
            pins: COILS
                .iter()
                .zip([16, 17, 18, 19])
                .map(|(name, gpio)| PinAssignment {
                    name: name.to_string(),
                    gpio,
                })
                .collect(),
            properties,
        };
        Stepper::new(&desc, &NodeContext::new("iotzoo/esp32/AA"), &hw.pins).unwrap()
    }

    #[test]
    fn move_is_spread_over_polls_and_reports_position() {
        let (hw, sim, _) = Hardware::simulated();
        let mut s = stepper(&hw);
        let mut bus = MockBus::new();
        bus.connect();
        assert!(s.on_message("iotzoo/esp32/AA/stepper/0/steps", "20", 0, &mut bus).unwrap());
        s.poll(0, &mut bus).unwrap();
        assert_eq!(s.position(), 8);
        s.poll(100, &mut bus).unwrap();
        s.poll(200, &mut bus).unwrap();
        assert_eq!(s.position(), 20);
        assert!(!s.is_moving());
        assert_eq!(bus.published().len(), 1);
        assert_eq!(bus.published()[0].payload, "20");
        let sim = sim.lock().unwrap();
        assert!([16, 17, 18, 19].iter().all(|p| !sim.level(*p)));
    }

    #[test]
    fn safe_mode_aborts_and_deenergizes() {
        let (hw, sim, _) = Hardware::simulated();
        let mut s = stepper(&hw);
        let mut bus = MockBus::new();
        s.on_message("iotzoo/esp32/AA/stepper/0/steps", "-100", 0, &mut bus).unwrap();
        s.poll(0, &mut bus).unwrap();
        assert_eq!(s.position(), -8);
        s.on_consumer_unavailable(&mut bus);
        assert!(!s.is_moving());
        s.poll(100, &mut bus).unwrap();
        assert_eq!(s.position(), -8);
        let sim = sim.lock().unwrap();
        assert!([16, 17, 18, 19].iter().all(|p| !sim.level(*p)));
    }

    #[test]
    fn bad_step_count_is_a_fault() {
        let (hw, _, _) = Hardware::simulated();
        let mut s = stepper(&hw);
        let mut bus = MockBus::new();
        assert!(s.on_message("iotzoo/esp32/AA/stepper/0/steps", "far", 0, &mut bus).is_err());
    }
}
