use crate::{LastWill, Message, Result, TransportError};

/// A minimal non-blocking publish/subscribe bus.
///
/// Implementations own their reconnect logic; callers only observe
/// [`MessageBus::is_connected`] and the session counter.
pub trait MessageBus {
    /// True while both the network link and the broker session are up.
    fn is_connected(&self) -> bool;

    /// Number of broker sessions established since the bus was created.
    /// Increments on every (re)connect.
    fn sessions_established(&self) -> u32;

    /// Largest payload the backend accepts, in bytes.
    fn max_payload(&self) -> usize;

    /// Drive the connection and return inbound messages for subscribed topics.
    /// Must return within a bounded time.
    fn service(&mut self) -> Result<Vec<Message>>;

    /// Publish one message.
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<()>;

    /// Subscribe to a topic filter (`+` and `#` wildcards allowed).
    fn subscribe(&mut self, filter: &str) -> Result<()>;

    fn unsubscribe(&mut self, _filter: &str) -> Result<()> {
        Err(TransportError::Unsupported("unsubscribe not supported"))
    }

    /// Register the message the broker publishes when the session drops.
    fn set_last_will(&mut self, _will: LastWill) -> Result<()> {
        Err(TransportError::Unsupported("last will not supported"))
    }
}
