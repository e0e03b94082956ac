//! bus-transport: publish/subscribe message-bus abstractions
//!
//! This crate provides the trait the control plane uses to talk to its message broker
//! (connect state, publish, subscribe, service). Concrete broker clients live behind
//! feature flags; the default build enables an in-memory `mock` backend so that the
//! node and its tests run on any host.

mod types;
pub use types::{topic_matches, LastWill, Message, Timestamp};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::MessageBus;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockBus;
