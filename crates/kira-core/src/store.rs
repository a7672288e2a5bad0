use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::EngineError;

pub const REMINDER_SETTINGS_KEY: &str = "kira_reminder_preferences";
pub const SENT_NOTIFICATIONS_KEY: &str = "kira_notifications_sent";
pub const SESSION_DATE_KEY: &str = "kira_notification_session_date";
pub const CURRENT_USER_KEY: &str = "kira_current_user";

/// Durable string blobs under fixed keys.
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, EngineError>;
    fn set(&self, key: &str, value: &str) -> Result<(), EngineError>;
    fn remove(&self, key: &str) -> Result<(), EngineError>;
}

/// One `<key>.json` file per blob inside the data directory.
#[derive(Debug)]
pub struct FileStore {
    pub data_dir: PathBuf,
}

impl FileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened blob store");
        Ok(Self { data_dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, EngineError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(EngineError::storage(key, "key is not a plain identifier"));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl BlobStore for FileStore {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => {
                debug!(file = %path.display(), bytes = raw.len(), "read blob");
                Ok(Some(raw))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(EngineError::storage(key, err)),
        }
    }

    #[tracing::instrument(skip(self, value))]
    fn set(&self, key: &str, value: &str) -> Result<(), EngineError> {
        let path = self.path_for(key)?;
        debug!(file = %path.display(), bytes = value.len(), "writing blob atomically");

        let mut temp =
            NamedTempFile::new_in(&self.data_dir).map_err(|err| EngineError::storage(key, err))?;
        temp.write_all(value.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|err| EngineError::storage(key, err))?;
        temp.persist(&path)
            .map_err(|err| EngineError::storage(key, err))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove(&self, key: &str) -> Result<(), EngineError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EngineError::storage(key, err)),
        }
    }
}

/// Process-local store; also the fallback when the data directory is
/// unusable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), EngineError> {
        self.blobs.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), EngineError> {
        self.blobs.lock().remove(key);
        Ok(())
    }
}

/// Reads and decodes a JSON blob. Unreadable or corrupt blobs count as
/// absent so callers fall back to defaults.
pub fn load_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            warn!(key, error = %err, "storage unavailable; using defaults");
            return None;
        }
    };

    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, error = %err, "discarding corrupt blob");
            None
        }
    }
}

pub fn save_json<T: Serialize>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
) -> Result<(), EngineError> {
    let json = serde_json::to_string(value).map_err(|err| EngineError::storage(key, err))?;
    store.set(key, &json)
}
