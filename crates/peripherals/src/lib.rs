//! peripherals: reference driver families for the hub node
//!
//! Each family exposes a `DEVICE_TYPE` tag, its property schema and a driver
//! implementing [`device_registry::Capability`] on top of the hardware traits
//! in [`hal`]. [`register_builtin_families`] wires them all into a
//! [`FamilyRegistry`].

pub mod hal;
pub use hal::{
    Hardware, HalError, PinBank, PinClaim, PinMode, SimulatedPins, SimulatedThermometer,
    Thermometer,
};

mod pulse;
pub use pulse::PulseCounter;

pub mod ds18b20;
pub mod reed_contact;
pub mod stepper;
pub mod switch;
pub mod traffic_light;

use bus_transport::{MessageBus, TransportError};
use device_registry::{
    Capability, DeviceDescriptor, DeviceIdentity, DriverConstructionError, DriverFault,
    FamilyRegistry, NodeContext,
};

/// Publish a reading. `Ok(false)` means the link is down and the caller should
/// try again later; other transport failures are faults.
pub(crate) fn publish(
    bus: &mut dyn MessageBus,
    identity: &DeviceIdentity,
    topic: &str,
    payload: &str,
    retain: bool,
) -> Result<bool, DriverFault> {
    match bus.publish(topic, payload, retain) {
        Ok(()) => Ok(true),
        Err(TransportError::NotConnected) => Ok(false),
        Err(e) => Err(DriverFault::new(identity, format!("publish {topic}: {e}"))),
    }
}

type Built = Result<Box<dyn Capability>, DriverConstructionError>;

/// Register every family in this crate against `hw`.
pub fn register_builtin_families(families: &mut FamilyRegistry, hw: &Hardware) {
    let pins = hw.pins.clone();
    families.register(
        switch::DEVICE_TYPE,
        switch::properties(),
        move |d: &DeviceDescriptor, ctx: &NodeContext| -> Built {
            Ok(Box::new(switch::Switch::new(d, ctx, &pins)?))
        },
    );

    let pins = hw.pins.clone();
    families.register(
        reed_contact::DEVICE_TYPE,
        reed_contact::properties(),
        move |d: &DeviceDescriptor, ctx: &NodeContext| -> Built {
            Ok(Box::new(reed_contact::ReedContact::new(d, ctx, &pins)?))
        },
    );

    let pins = hw.pins.clone();
    let thermometer = hw.thermometer.clone();
    families.register(
        ds18b20::DEVICE_TYPE,
        ds18b20::properties(),
        move |d: &DeviceDescriptor, ctx: &NodeContext| -> Built {
            Ok(Box::new(ds18b20::Ds18b20::new(d, ctx, &pins, &thermometer)?))
        },
    );

    let pins = hw.pins.clone();
    families.register(
        traffic_light::DEVICE_TYPE,
        traffic_light::properties(),
        move |d: &DeviceDescriptor, ctx: &NodeContext| -> Built {
            Ok(Box::new(traffic_light::TrafficLight::new(d, ctx, &pins)?))
        },
    );

    let pins = hw.pins.clone();
    families.register(
        stepper::DEVICE_TYPE,
        stepper::properties(),
        move |d: &DeviceDescriptor, ctx: &NodeContext| -> Built {
            Ok(Box::new(stepper::Stepper::new(d, ctx, &pins)?))
        },
    );

    tracing::info!(families = families.len(), "built-in driver families registered");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_transport::MockBus;
    use device_registry::{DeviceRegistry, ManifestParser};

    #[test]
    fn builtin_families_are_registered() {
        let (hw, _, _) = Hardware::simulated();
        let mut families = FamilyRegistry::new();
        register_builtin_families(&mut families, &hw);
        let types: Vec<&str> = families.device_types().collect();
        assert_eq!(
            types,
            vec!["28BY48Stepper", "DS18B20", "LEDS Traffic Light", "Reed-Contact", "Switch"]
        );
    }

    #[test]
    fn manifest_values_are_clamped_before_construction() {
        let (hw, _, therm) = Hardware::simulated();
        therm.lock().unwrap().set_readings(4, vec![18.0]);
        let mut families = FamilyRegistry::new();
        register_builtin_families(&mut families, &hw);
        let json = r#"[
            {"DeviceType":"DS18B20","DeviceIndex":0,"IsEnabled":true,
             "Pins":[{"PinName":"Data","MicrocontrollerGpoPin":"4"}],
             "PropertyValues":[{"Name":"Interval","Value":1000},{"Name":"Resolution","Value":"12"}]}
        ]"#;
        let descs = ManifestParser::new(&families).parse(json).unwrap();
        assert_eq!(descs[0].properties.get("Interval").and_then(|v| v.as_i64()), Some(5_000));
        assert_eq!(descs[0].properties.get("Resolution").and_then(|v| v.as_i64()), Some(11));

        let mut registry = DeviceRegistry::new();
        let errors = registry.instantiate(&descs, &families, &NodeContext::new("iotzoo/esp32/AA"));
        assert!(errors.is_empty());
        let mut bus = MockBus::new();
        bus.connect();
        assert!(registry.poll_all(0, &mut bus).is_empty());
        assert_eq!(bus.published()[0].topic, "iotzoo/esp32/AA/ds18b20/0/0");
    }

    #[test]
    fn publish_skips_when_disconnected() {
        let mut bus = MockBus::new();
        let id = DeviceIdentity::new("Switch", 0);
        assert!(!publish(&mut bus, &id, "a", "1", false).unwrap());
        bus.connect();
        assert!(publish(&mut bus, &id, "a", "1", false).unwrap());
        bus.set_fail_publish(true);
        assert!(publish(&mut bus, &id, "a", "1", false).is_err());
    }
}
