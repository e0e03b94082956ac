use crate::{
    Capability, DeviceDescriptor, DeviceIdentity, DriverConstructionError, DriverFault,
    FamilyRegistry, MetricsHub, Millis, NodeContext, Topic,
};
use bus_transport::MessageBus;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

/// Lifecycle of one driver slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Instantiated,
    LinkEstablished,
    ConsumerUnavailable,
    Destroyed,
}

/// The registry's record of one instantiated driver.
pub struct DriverHandle {
    identity: DeviceIdentity,
    driver: Box<dyn Capability>,
    state: SlotState,
    linked: bool,
}

impl DriverHandle {
    fn new(driver: Box<dyn Capability>) -> Self {
        Self {
            identity: driver.identity().clone(),
            driver,
            state: SlotState::Instantiated,
            linked: false,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn device_index(&self) -> i32 {
        self.identity.device_index
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn describe_topics(&self) -> Vec<Topic> {
        self.driver.describe_topics()
    }

    pub fn poll(&mut self, now: Millis, bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        let driver = &mut self.driver;
        isolate(&self.identity, || driver.poll(now, bus))
    }

    pub fn on_link_established(
        &mut self,
        session: u32,
        bus: &mut dyn MessageBus,
    ) -> Result<(), DriverFault> {
        let driver = &mut self.driver;
        let result = isolate(&self.identity, || driver.on_link_established(session, bus));
        self.linked = true;
        if self.state == SlotState::Instantiated {
            self.state = SlotState::LinkEstablished;
        }
        result
    }

    pub fn on_consumer_unavailable(&mut self, bus: &mut dyn MessageBus) -> Result<(), DriverFault> {
        let driver = &mut self.driver;
        let result = isolate(&self.identity, || {
            driver.on_consumer_unavailable(bus);
            Ok(())
        });
        self.state = SlotState::ConsumerUnavailable;
        result
    }

    fn on_consumer_available(&mut self) {
        if self.state == SlotState::ConsumerUnavailable {
            self.state = if self.linked {
                SlotState::LinkEstablished
            } else {
                SlotState::Instantiated
            };
        }
    }

    fn on_message(
        &mut self,
        topic: &str,
        payload: &str,
        now: Millis,
        bus: &mut dyn MessageBus,
    ) -> Result<bool, DriverFault> {
        let driver = &mut self.driver;
        isolate(&self.identity, || driver.on_message(topic, payload, now, bus))
    }
}

impl core::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .finish()
    }
}

// A panicking driver is reported like one that returned a fault.
fn isolate<T>(
    identity: &DeviceIdentity,
    call: impl FnOnce() -> Result<T, DriverFault>,
) -> Result<T, DriverFault> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(DriverFault::new(
            identity,
            format!("driver panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Owns every driver for the lifetime of the loaded manifest and drives their
/// callbacks in manifest order.
#[derive(Debug)]
pub struct DeviceRegistry {
    handles: Vec<DriverHandle>,
    link_session: Option<u32>,
    consumer_available: bool,
    destroyed: bool,
    metrics: Option<MetricsHub>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self {
            handles: Vec::new(),
            link_session: None,
            consumer_available: true,
            destroyed: false,
            metrics: None,
        }
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: MetricsHub) -> Self {
        metrics.dev.drivers_loaded.set(self.handles.len() as i64);
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&MetricsHub> {
        self.metrics.as_ref()
    }

    /// Build a best-effort driver set. Disabled entries are skipped silently;
    /// every failing entry yields one error and the rest still load. The first
    /// enabled entry for an identity wins even when its construction fails.
    pub fn instantiate(
        &mut self,
        descriptors: &[DeviceDescriptor],
        families: &FamilyRegistry,
        ctx: &NodeContext,
    ) -> Vec<DriverConstructionError> {
        let mut errors = Vec::new();
        let mut seen: HashSet<DeviceIdentity> =
            self.handles.iter().map(|h| h.identity.clone()).collect();
        for desc in descriptors {
            if !desc.is_enabled {
                tracing::debug!(identity = %desc.identity(), "descriptor disabled, skipping");
                continue;
            }
            let identity = desc.identity();
            if !seen.insert(identity.clone()) {
                errors.push(DriverConstructionError::DuplicateIdentity(identity));
                continue;
            }
            if !families.contains(&desc.device_type) {
                tracing::info!(%identity, "no driver family for device type");
                continue;
            }
            match families.construct(desc, ctx) {
                Ok(driver) => {
                    tracing::info!(%identity, "driver instantiated");
                    self.handles.push(DriverHandle::new(driver));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "driver construction failed");
                    errors.push(e);
                }
            }
        }
        self.destroyed = false;
        if let Some(m) = &self.metrics {
            m.dev.drivers_loaded.set(self.handles.len() as i64);
            m.dev.construction_failures.inc_by(errors.len() as u64);
        }
        errors
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = &DriverHandle> {
        self.handles.iter()
    }

    pub fn identities(&self) -> Vec<DeviceIdentity> {
        self.handles.iter().map(|h| h.identity.clone()).collect()
    }

    pub fn get(&self, identity: &DeviceIdentity) -> Option<&DriverHandle> {
        self.handles.iter().find(|h| &h.identity == identity)
    }

    pub fn consumer_available(&self) -> bool {
        self.consumer_available
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Poll every driver once, in manifest order. A fault in one driver does not
    /// stop the cycle.
    pub fn poll_all(&mut self, now: Millis, bus: &mut dyn MessageBus) -> Vec<DriverFault> {
        let mut faults = Vec::new();
        for handle in &mut self.handles {
            if let Err(fault) = handle.poll(now, bus) {
                tracing::warn!(%fault, "driver poll failed");
                faults.push(fault);
            }
        }
        self.count_faults(faults.len());
        faults
    }

    /// Tell every driver about a fresh transport session. Repeated calls for the
    /// same session are ignored.
    pub fn link_established(&mut self, session: u32, bus: &mut dyn MessageBus) -> Vec<DriverFault> {
        if self.link_session == Some(session) {
            tracing::debug!(session, "link session already announced to drivers");
            return Vec::new();
        }
        self.link_session = Some(session);
        let mut faults = Vec::new();
        for handle in &mut self.handles {
            if let Err(fault) = handle.on_link_established(session, bus) {
                tracing::warn!(%fault, "driver link setup failed");
                faults.push(fault);
            }
        }
        self.count_faults(faults.len());
        faults
    }

    /// Record the consumer's availability. Drivers are notified on the falling
    /// edge only; the rising edge needs no callback.
    pub fn set_consumer_available(
        &mut self,
        available: bool,
        bus: &mut dyn MessageBus,
    ) -> Vec<DriverFault> {
        if available == self.consumer_available {
            return Vec::new();
        }
        self.consumer_available = available;
        if available {
            for handle in &mut self.handles {
                handle.on_consumer_available();
            }
            return Vec::new();
        }
        tracing::warn!(drivers = self.handles.len(), "consumer unavailable, entering safe mode");
        let mut faults = Vec::new();
        for handle in &mut self.handles {
            if let Err(fault) = handle.on_consumer_unavailable(bus) {
                faults.push(fault);
            }
        }
        if let Some(m) = &self.metrics {
            m.dev.safe_mode_fanouts.inc();
        }
        self.count_faults(faults.len());
        faults
    }

    /// Offer an inbound message to the drivers in manifest order until one
    /// consumes it.
    pub fn route_message(
        &mut self,
        topic: &str,
        payload: &str,
        now: Millis,
        bus: &mut dyn MessageBus,
    ) -> Result<bool, DriverFault> {
        for handle in &mut self.handles {
            match handle.on_message(topic, payload, now, bus) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(fault) => {
                    self.count_faults(1);
                    return Err(fault);
                }
            }
        }
        Ok(false)
    }

    /// Every driver's topics, in manifest order.
    pub fn describe_topics(&self) -> Vec<Topic> {
        self.handles
            .iter()
            .flat_map(DriverHandle::describe_topics)
            .collect()
    }

    /// Drop every driver. Only done right before a restart.
    pub fn release_all(&mut self) -> usize {
        let released = self.handles.len();
        for handle in &mut self.handles {
            handle.state = SlotState::Destroyed;
            tracing::debug!(identity = %handle.identity, "releasing driver");
        }
        self.handles.clear();
        self.link_session = None;
        self.destroyed = true;
        if let Some(m) = &self.metrics {
            m.dev.drivers_loaded.set(0);
        }
        released
    }

    fn count_faults(&self, n: usize) {
        if n == 0 {
            return;
        }
        if let Some(m) = &self.metrics {
            m.dev.driver_faults.inc_by(n as u64);
        }
    }
}
