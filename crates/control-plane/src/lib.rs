//! control-plane: boot, discovery and liveness for a hub node
//!
//! The [`Node`] owns a message bus, a settings store and the device registry.
//! Each call to [`Node::step`] runs one iteration of the cooperative control
//! loop; restarts are returned to the caller instead of being performed here.

mod error;
pub use error::{ControlPlaneError, Result, SettingsError};

mod clock;
pub use clock::{Clock, ManualClock, MonotonicClock};

mod identity;
pub use identity::NodeIdentity;

mod config;
pub use config::NodeConfig;

pub mod settings;
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore};

pub mod messages;

mod control;
pub use control::{ControlCommand, ControlTopics, StatusRequest};

mod discovery;
pub use discovery::{node_topics, plan_discovery, DiscoveryLimits, DiscoveryPlan};

mod node;
pub use node::{Node, RestartReason, StepOutcome};
