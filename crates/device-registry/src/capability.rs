use crate::{DeviceIdentity, DriverFault, Millis, Topic};
use bus_transport::MessageBus;

/// What the node hands every driver at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContext {
    /// `[<namespace>/][<project>/]<board>/<mac>`; every driver topic lives below it.
    pub base_topic: String,
}

impl NodeContext {
    pub fn new(base_topic: impl Into<String>) -> Self {
        Self {
            base_topic: base_topic.into(),
        }
    }

    /// `<base>/<segment>/<index>`, the layout every driver family uses.
    pub fn device_topic(&self, segment: &str, device_index: i32) -> String {
        format!("{}/{}/{}", self.base_topic, segment, device_index)
    }
}

/// The contract every peripheral driver satisfies.
///
/// All callbacks run on the single control loop and must return quickly; a
/// driver throttles itself against its own interval, the registry does not.
pub trait Capability {
    fn identity(&self) -> &DeviceIdentity;

    /// Bounded, non-blocking unit of work.
    fn poll(&mut self, now: Millis, bus: &mut dyn MessageBus) -> Result<(), DriverFault>;

    /// Pure and deterministic; no I/O.
    fn describe_topics(&self) -> Vec<Topic>;

    /// Called once per link session, in manifest order. Implementations use a
    /// [`LinkSession`] to skip resubscription when invoked twice for one session.
    fn on_link_established(
        &mut self,
        session: u32,
        bus: &mut dyn MessageBus,
    ) -> Result<(), DriverFault>;

    /// Put the hardware into a safe state. Must not block or retry.
    fn on_consumer_unavailable(&mut self, bus: &mut dyn MessageBus);

    /// Offer an inbound message. Returns `Ok(true)` when the driver consumed it.
    fn on_message(
        &mut self,
        _topic: &str,
        _payload: &str,
        _now: Millis,
        _bus: &mut dyn MessageBus,
    ) -> Result<bool, DriverFault> {
        Ok(false)
    }
}

/// Remembers which link session a driver already set up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkSession {
    current: Option<u32>,
}

impl LinkSession {
    /// True the first time it is called for `session`, false on repeats.
    pub fn begin(&mut self, session: u32) -> bool {
        if self.current == Some(session) {
            return false;
        }
        self.current = Some(session);
        true
    }

    pub fn is_established(&self) -> bool {
        self.current.is_some()
    }
}
