use crate::hal::{construction_error, lock, PinClaim, PinMode, SharedPins, SharedThermometer};
use crate::publish;
use bus_transport::MessageBus;
use device_registry::{
    Capability, DeviceDescriptor, DeviceIdentity, DriverConstructionError, DriverFault, Millis,
    NodeContext, PropertySpec, Topic,
};

pub const DEVICE_TYPE: &str = "DS18B20";

pub fn properties() -> Vec<PropertySpec> {
    vec![
        PropertySpec::int("Interval", 20_000, 5_000, 900_000),
        PropertySpec::int("Resolution", 11, 9, 11),
    ]
}

/// One-wire temperature sensors sharing a data pin; one topic per sensor.
pub struct Ds18b20 {
    identity: DeviceIdentity,
    pin: PinClaim,
    thermometer: SharedThermometer,
    sensor_topics: Vec<String>,
    interval_ms: u64,
    resolution: u8,
    last_read: Option<Millis>,
}

impl Ds18b20 {
    pub fn new(
        desc: &DeviceDescriptor,
        ctx: &NodeContext,
        pins: &SharedPins,
        thermometer: &SharedThermometer,
    ) -> Result<Self, DriverConstructionError> {
        let interval = desc.require_int("Interval")?;
        let resolution = desc.require_int("Resolution")?;
        let pin = PinClaim::acquire(pins, desc, "Data", PinMode::Input)?;
        let sensors = lock(thermometer)
            .and_then(|mut t| t.sensor_count(pin.gpio()))
            .map_err(|e| construction_error(desc, e))?;
        if sensors == 0 {
            tracing::warn!(identity = %desc.identity(), gpio = pin.gpio(), "no sensors found on one-wire bus");
        }
        let base = ctx.device_topic("ds18b20", desc.device_index);
        Ok(Self {
            identity: desc.identity(),
            pin,
            thermometer: thermometer.clone(),
            sensor_topics: (0..sensors).map(|i| format!("{base}/{i}")).collect(),
            interval_ms: u64::try_from(interval).unwrap_or(20_000),
            resolution: u8::try_from(resolution).unwrap_or(11),
            last_read: None,
        })
    }
}

impl Capability for Ds18b20 {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn poll(&mut self, now: Millis, bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        if let Some(last) = self.last_read {
            if now.saturating_sub(last) < self.interval_ms {
                return Ok(());
            }
        }
        self.last_read = Some(now);
        let readings = lock(&self.thermometer)
            .and_then(|mut t| t.read_celsius(self.pin.gpio(), self.resolution))
            .map_err(|e| DriverFault::new(&self.identity, e.to_string()))?;
        for (topic, celsius) in self.sensor_topics.iter().zip(readings) {
            publish(bus, &self.identity, topic, &format!("{celsius:.2}"), false)?;
        }
        Ok(())
    }

    fn describe_topics(&self) -> Vec<Topic> {
        self.sensor_topics
            .iter()
            .map(|t| Topic::outbound(t.clone(), "21.25").persisted())
            .collect()
    }

    fn on_link_established(&mut self, _session: u32, _bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        self.last_read = None;
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

    fn descriptor() -> DeviceDescriptor {
        let mut properties = Properties::new();
        properties.set("Interval", PropValue::Int(5_000));
        properties.set("Resolution", PropValue::Int(9));
        DeviceDescriptor {
            device_type: DEVICE_TYPE.into(),
            device_index: 0,
            is_enabled: true,
            pins: vec![PinAssignment {
                name: "Data".into(),
                gpio: 23,
            }],
            properties,
        }
    }

    #[test]
    fn one_topic_per_sensor_and_interval_throttling() {
        let (hw, _, therm) = Hardware::simulated();
        therm.lock().unwrap().set_readings(23, vec![20.1, 22.8]);
        let mut sensor =
            Ds18b20::new(&descriptor(), &NodeContext::new("iotzoo/esp32/AA"), &hw.pins, &hw.thermometer)
                .unwrap();
        let names: Vec<String> = sensor.describe_topics().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["iotzoo/esp32/AA/ds18b20/0/0", "iotzoo/esp32/AA/ds18b20/0/1"]);

        let mut bus = MockBus::new();
        bus.connect();
        sensor.poll(0, &mut bus).unwrap();
        sensor.poll(4_999, &mut bus).unwrap();
        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.published()[0].payload, "20.00");
        assert_eq!(bus.published()[1].payload, "23.00");
        sensor.poll(5_000, &mut bus).unwrap();
        assert_eq!(bus.published().len(), 4);
    }

    #[test]
    fn sensor_failure_is_a_fault() {
        let (hw, _, therm) = Hardware::simulated();
        therm.lock().unwrap().set_readings(23, vec![20.0]);
        let mut sensor =
            Ds18b20::new(&descriptor(), &NodeContext::new("b"), &hw.pins, &hw.thermometer).unwrap();
        therm.lock().unwrap().set_failing(true);
        let mut bus = MockBus::new();
        let fault = sensor.poll(0, &mut bus).unwrap_err();
        assert_eq!(fault.identity, DeviceIdentity::new(DEVICE_TYPE, 0));
    }
}
