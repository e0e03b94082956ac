//! device-registry: manifest-driven registry of peripheral drivers

mod types;
pub use types::*;

mod error;
pub use error::{DriverConstructionError, DriverFault, ManifestParseError};

mod capability;
pub use capability::{Capability, LinkSession, NodeContext};

mod family;
pub use family::{DriverFactory, FamilyRegistry, PropertyKind, PropertySpec};

mod manifest;
#[cfg(feature = "schema")]
pub use manifest::manifest_schema;
pub use manifest::{
    load_manifest_file, ManifestEntry, ManifestParser, ManifestPin, ManifestProperty,
    DEFAULT_MANIFEST_CAPACITY,
};

mod registry;
pub use registry::{DeviceRegistry, DriverHandle, SlotState};

mod metrics;
pub use metrics::{DeviceMetrics, MetricsHub};
