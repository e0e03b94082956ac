//! node-liveness: consumer liveness tracking and control-loop stall detection
//!
//! Two signals are kept apart here:
//! - transport liveness, which is only read (it belongs to the bus backend)
//! - consumer liveness, driven by heartbeat emission and acknowledgements
//!
//! The monitor never talks to the bus or the drivers itself. It reports edges
//! and due heartbeats; the control loop acts on them.

mod types;
pub use types::{AckLedMode, DayMode, LivenessConfig, LivenessState, Millis, MIN_HEARTBEAT_INTERVAL_MS};

mod monitor;
pub use monitor::{AckOutcome, LivenessMonitor, LivenessTick};

mod watchdog;
pub use watchdog::{ControlLoopStall, LoopStallWatchdog, DEFAULT_STALL_CEILING_MS};
