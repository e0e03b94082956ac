use crate::DeviceIdentity;
use thiserror::Error;

/// The persisted manifest could not be turned into descriptors.
///
/// Never fatal: the node boots with zero drivers and reports the message on
/// its error channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManifestParseError {
    #[error("manifest of {size} bytes exceeds the {limit} byte deserialization buffer")]
    TooLarge { size: usize, limit: usize },
    #[error("malformed manifest json: {0}")]
    Malformed(String),
    #[error("manifest must be a json array of device descriptors")]
    NotAnArray,
}

/// One descriptor could not be turned into a driver. The descriptor is skipped,
/// the remaining ones are still instantiated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverConstructionError {
    #[error("{0}: no driver family registered for this device type")]
    UnknownType(DeviceIdentity),
    #[error("{0}: an earlier manifest entry has the same type and index")]
    DuplicateIdentity(DeviceIdentity),
    #[error("{identity}: missing pin '{pin}'")]
    MissingPin {
        identity: DeviceIdentity,
        pin: String,
    },
    #[error("{identity}: invalid gpio {gpio} for pin '{pin}'")]
    InvalidPin {
        identity: DeviceIdentity,
        pin: String,
        gpio: i32,
    },
    #[error("{identity}: invalid value for property '{property}': {reason}")]
    InvalidProperty {
        identity: DeviceIdentity,
        property: String,
        reason: String,
    },
    #[error("{identity}: hardware error: {reason}")]
    Hardware {
        identity: DeviceIdentity,
        reason: String,
    },
}

impl DriverConstructionError {
    pub fn identity(&self) -> &DeviceIdentity {
        match self {
            Self::UnknownType(identity) | Self::DuplicateIdentity(identity) => identity,
            Self::MissingPin { identity, .. }
            | Self::InvalidPin { identity, .. }
            | Self::InvalidProperty { identity, .. }
            | Self::Hardware { identity, .. } => identity,
        }
    }
}

/// A driver callback failed. Isolated to that driver; the cycle goes on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{identity}: {message}")]
pub struct DriverFault {
    pub identity: DeviceIdentity,
    pub message: String,
}

impl DriverFault {
    pub fn new(identity: &DeviceIdentity, message: impl Into<String>) -> Self {
        Self {
            identity: identity.clone(),
            message: message.into(),
        }
    }
}
