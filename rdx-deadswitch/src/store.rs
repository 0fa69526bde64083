//! Durable key-value persistence for the engine's state blobs.
//!
//! The engine treats persistence as an opaque synchronous store of serialized
//! blobs keyed by logical name. Two backends are provided: [`MemoryStore`] for
//! tests and embedding, and [`FileStore`], which keeps one JSON file per key in
//! a data directory and replaces files atomically.
//!
//! [`StateStore`] layers typed access on top. Reads never fail: a missing blob
//! yields the documented default, and a corrupt one is logged and replaced by
//! the default as well.

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Logical names of the persisted blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Settings,
    /// The user status, including the pre-warning flag.
    Status,
    Contacts,
    Devices,
    Memo,
    HealthSample,
    Logs,
    Notifications,
    DeviceUdid,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Settings => "settings",
            StoreKey::Status => "status",
            StoreKey::Contacts => "contacts",
            StoreKey::Devices => "devices",
            StoreKey::Memo => "memo",
            StoreKey::HealthSample => "health_sample",
            StoreKey::Logs => "logs",
            StoreKey::Notifications => "notifications",
            StoreKey::DeviceUdid => "device_udid",
        }
    }
}

/// A synchronous blob store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// An in-process store. Contents are lost when it is dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per entry inside `root`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and creates, if needed) the data directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let staging = self.root.join(format!(".{key}.json.tmp"));
        fs::write(&staging, value)
            .and_then(|_| fs::rename(&staging, &path))
            .map_err(|source| StoreError::Io { path, source })
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

/// Typed access to a [`KeyValueStore`].
pub struct StateStore {
    inner: Box<dyn KeyValueStore>,
}

impl StateStore {
    pub fn new(inner: impl KeyValueStore + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    /// Loads a blob, or `None` if it is missing, unreadable or corrupt.
    pub fn load<T: DeserializeOwned>(&self, key: StoreKey) -> Option<T> {
        let raw = match self.inner.get(key.as_str()) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No stored '{}', using defaults.", key.as_str());
                return None;
            }
            Err(e) => {
                warn!("Could not read '{}': {}. Using defaults.", key.as_str(), e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Stored '{}' is corrupt ({}). Using defaults.", key.as_str(), e);
                None
            }
        }
    }

    /// Loads a blob or falls back to `default()`.
    pub fn load_or<T: DeserializeOwned>(&self, key: StoreKey, default: impl FnOnce() -> T) -> T {
        self.load(key).unwrap_or_else(default)
    }

    pub fn save<T: Serialize>(&mut self, key: StoreKey, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.as_str(),
            source,
        })?;
        self.inner.set(key.as_str(), &raw)
    }

    pub fn remove(&mut self, key: StoreKey) -> Result<(), StoreError> {
        self.inner.remove(key.as_str())
    }

    /// The persisted device identity, generated on first use.
    pub fn device_udid(&mut self) -> String {
        if let Some(udid) = self.load::<String>(StoreKey::DeviceUdid) {
            return udid;
        }
        let udid = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self.save(StoreKey::DeviceUdid, &udid) {
            warn!("Could not persist the device identity: {}", e);
        }
        udid
    }
}
