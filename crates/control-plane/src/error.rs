use bus_transport::TransportError;
use device_registry::ManifestParseError;
use node_liveness::ControlLoopStall;
use thiserror::Error;

pub type Result<T, E = ControlPlaneError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(String),
    #[error("settings file is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error(transparent)]
    Manifest(#[from] ManifestParseError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("cannot decode '{payload}' on {topic}: {reason}")]
    Decode {
        topic: String,
        payload: String,
        reason: String,
    },
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Stall(#[from] ControlLoopStall),
    #[error("{0}")]
    Rejected(String),
}

impl ControlPlaneError {
    pub fn decode(topic: &str, payload: &str, reason: impl ToString) -> Self {
        ControlPlaneError::Decode {
            topic: topic.to_string(),
            payload: payload.to_string(),
            reason: reason.to_string(),
        }
    }
}
