use crate::error::SettingsError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const KEY_DEVICES: &str = "devices";
pub const KEY_INTERVAL_ALIVE: &str = "interval_alive";
pub const KEY_ALIVE_LED: &str = "alive_led";
pub const KEY_NAMESPACE: &str = "namespace_name";
pub const KEY_PROJECT: &str = "project_name";
pub const KEY_BROKER_IP: &str = "mqtt_broker_ip";

/// Persistent key/value storage that survives restarts.
pub trait SettingsStore {
    fn load(&self, key: &str) -> Result<Option<String>, SettingsError>;

    fn store(&mut self, key: &str, data: &str) -> Result<(), SettingsError>;

    fn remove(&mut self, key: &str) -> Result<(), SettingsError>;

    /// Parse a stored value, treating unparsable data as absent.
    fn load_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, SettingsError>
    where
        Self: Sized,
    {
        Ok(self.load(key)?.and_then(|raw| match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, raw = %raw, "ignoring unparsable setting");
                None
            }
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySettings {
    entries: BTreeMap<String, String>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, data: &str) -> Self {
        self.entries.insert(key.to_string(), data.to_string());
        self
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.entries.get(key).cloned())
    }

    fn store(&mut self, key: &str, data: &str) -> Result<(), SettingsError> {
        self.entries.insert(key.to_string(), data.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), SettingsError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Settings kept in one JSON object on disk, rewritten on every change.
#[derive(Debug, Clone)]
pub struct JsonFileSettings {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileSettings {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| SettingsError::Io(format!("{}: {e}", path.display())))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| SettingsError::Corrupt(format!("{}: {e}", path.display())))?
            }
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), keys = entries.len(), "settings opened");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| SettingsError::Corrupt(e.to_string()))?;
        fs::write(&self.path, json)
            .map_err(|e| SettingsError::Io(format!("{}: {e}", self.path.display())))
    }
}

impl SettingsStore for JsonFileSettings {
    fn load(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.entries.get(key).cloned())
    }

    fn store(&mut self, key: &str, data: &str) -> Result<(), SettingsError> {
        self.entries.insert(key.to_string(), data.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), SettingsError> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}
