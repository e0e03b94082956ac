use crate::hal::{construction_error, PinClaim, PinMode, SharedPins};
use crate::{publish, PulseCounter};
use bus_transport::MessageBus;
use device_registry::{
    Capability, DeviceDescriptor, DeviceIdentity, DriverConstructionError, DriverFault, Millis,
    NodeContext, PropertySpec, Topic,
};

pub const DEVICE_TYPE: &str = "Reed-Contact";

/// No edge for this long means the wheel stands still.
pub const IDLE_AFTER_MS: u64 = 3_000;

pub fn properties() -> Vec<PropertySpec> {
    vec![PropertySpec::int("IntervalMs", 1_000, 200, 60_000)]
}

/// Counts reed-contact closures (e.g. a water or gas meter) and publishes the
/// running total and pulses per minute.
#[derive(Debug)]
pub struct ReedContact {
    identity: DeviceIdentity,
    _pin: PinClaim,
    counter: PulseCounter,
    counter_topic: String,
    ppm_topic: String,
    interval_ms: u64,
    window_start: Option<Millis>,
    last_sent: Option<(u64, u64)>,
}

impl ReedContact {
    pub fn new(
        desc: &DeviceDescriptor,
        ctx: &NodeContext,
        pins: &SharedPins,
    ) -> Result<Self, DriverConstructionError> {
        let interval_ms = desc.require_int("IntervalMs")?;
        let pin = PinClaim::acquire(pins, desc, "Data", PinMode::InputPullUp)?;
        let counter = PulseCounter::new();
        pin.attach_counter(counter.clone())
            .map_err(|e| construction_error(desc, e))?;
        let base = ctx.device_topic("reed_contact", desc.device_index);
        Ok(Self {
            identity: desc.identity(),
            _pin: pin,
            counter,
            counter_topic: format!("{base}/counter"),
            ppm_topic: format!("{base}/ppm"),
            interval_ms: u64::try_from(interval_ms).unwrap_or(1_000),
            window_start: None,
            last_sent: None,
        })
    }

    pub fn counter(&self) -> &PulseCounter {
        &self.counter
    }
}

impl Capability for ReedContact {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn poll(&mut self, now: Millis, bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        let start = *self.window_start.get_or_insert(now);
        let elapsed = now.saturating_sub(start);
        if elapsed < self.interval_ms {
            return Ok(());
        }
        self.window_start = Some(now);

        let delta = self.counter.take_delta();
        let idle = self
            .counter
            .last_edge_ms()
            .map_or(true, |edge| now.saturating_sub(edge) > IDLE_AFTER_MS);
        let ppm = if idle { 0 } else { delta * 60_000 / elapsed.max(1) };
        let total = self.counter.total();

        if self.last_sent == Some((total, ppm)) {
            return Ok(());
        }
        let sent_total = publish(bus, &self.identity, &self.counter_topic, &total.to_string(), false)?;
        let sent_ppm = publish(bus, &self.identity, &self.ppm_topic, &ppm.to_string(), false)?;
        if sent_total && sent_ppm {
            self.last_sent = Some((total, ppm));
        }
        Ok(())
    }

    fn describe_topics(&self) -> Vec<Topic> {
        vec![
            Topic::outbound(self.counter_topic.clone(), "1234").persisted(),
            Topic::outbound(self.ppm_topic.clone(), "12").persisted(),
        ]
    }

    fn on_link_established(&mut self, _session: u32, _bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        self.last_sent = None;
        Ok(())
    }

    fn on_consumer_unavailable(&mut self, _bus: &mut dyn MessageBus) {}
}
