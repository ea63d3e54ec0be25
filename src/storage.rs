use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace, warn};

use crate::table::SchemaError;

/// Checks a value before it is written or after it is read back.
pub type Validator<T> = Box<dyn Fn(&T) -> Result<(), SchemaError>>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("refusing to store invalid data: {0}")]
    Invalid(#[from] SchemaError),
    #[error("storage for '{key}' is unavailable: {source}")]
    Unavailable {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("stored data for '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("'{0}' is not a valid storage key")]
    InvalidKey(String),
    #[error("could not serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    LocalStorage,
    #[default]
    InMemory,
}

impl From<&str> for StorageKind {
    /// Only `local-storage` selects the on disk backend.
    fn from(value: &str) -> Self {
        match value.trim() {
            "local-storage" => StorageKind::LocalStorage,
            _ => StorageKind::InMemory,
        }
    }
}

impl From<Option<&str>> for StorageKind {
    fn from(value: Option<&str>) -> Self {
        value.map(StorageKind::from).unwrap_or_default()
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::LocalStorage => write!(f, "local-storage"),
            StorageKind::InMemory => write!(f, "in-memory"),
        }
    }
}

/// Key-value persistence for exactly one value type.
pub trait StorageService<T> {
    /// Reads a value, telling absent, unreadable and corrupt content apart.
    fn load(&self, key: &str) -> Result<Option<T>, StorageError>;

    /// Validates, then stores. Nothing is written if validation fails.
    fn set(&mut self, key: &str, value: &T) -> Result<(), StorageError>;

    /// Deletes the value if there is one.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;

    fn validate(&self, value: &T) -> Result<(), SchemaError>;

    /// Like [`StorageService::load`], but every failure reads as absent.
    fn get(&self, key: &str) -> Option<T> {
        match self.load(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Treating '{key}' as absent: {e}");
                None
            }
        }
    }
}

fn decode<T: DeserializeOwned>(
    key: &str,
    raw: &str,
    validator: &Validator<T>,
) -> Result<T, StorageError> {
    let value: T = serde_json::from_str(raw).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    validator(&value).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(value)
}

fn encode<T: Serialize>(value: &T, validator: &Validator<T>) -> Result<String, StorageError> {
    validator(value)?;
    Ok(serde_json::to_string(value)?)
}

/// Volatile storage. Values are kept serialized so that reads go through the
/// same decoding and validation as the on disk backend.
pub struct InMemoryStorage<T> {
    entries: HashMap<String, String>,
    validator: Validator<T>,
}

impl<T> InMemoryStorage<T> {
    pub fn new(validator: Validator<T>) -> Self {
        Self {
            entries: HashMap::new(),
            validator,
        }
    }

    /// Stores a payload as is, bypassing validation.
    #[cfg(test)]
    pub fn insert_raw(&mut self, key: &str, raw: &str) {
        self.entries.insert(key.to_string(), raw.to_string());
    }

    #[cfg(test)]
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

impl<T: Serialize + DeserializeOwned> StorageService<T> for InMemoryStorage<T> {
    fn load(&self, key: &str) -> Result<Option<T>, StorageError> {
        trace!("In memory get '{key}'");
        self.entries
            .get(key)
            .map(|raw| decode(key, raw, &self.validator))
            .transpose()
    }

    fn set(&mut self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = encode(value, &self.validator)?;
        self.entries.insert(key.to_string(), raw);
        trace!("In memory set '{key}'");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        trace!("In memory remove '{key}'");
        Ok(())
    }

    fn validate(&self, value: &T) -> Result<(), SchemaError> {
        (self.validator)(value)
    }
}

/// Durable storage: one `<key>.json` document per key inside a directory.
pub struct LocalStorage<T> {
    dir: PathBuf,
    validator: Validator<T>,
}

impl<T> LocalStorage<T> {
    pub fn new(dir: impl Into<PathBuf>, validator: Validator<T>) -> Self {
        Self {
            dir: dir.into(),
            validator,
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn unavailable(key: &str, source: io::Error) -> StorageError {
        StorageError::Unavailable {
            key: key.to_string(),
            source,
        }
    }
}

impl<T: Serialize + DeserializeOwned> StorageService<T> for LocalStorage<T> {
    fn load(&self, key: &str) -> Result<Option<T>, StorageError> {
        let path = self.path_for(key)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No stored data at {:?}", path);
                return Ok(None);
            }
            Err(e) => return Err(Self::unavailable(key, e)),
        };
        decode(key, &raw, &self.validator).map(Some)
    }

    fn set(&mut self, key: &str, value: &T) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let raw = encode(value, &self.validator)?;
        fs::create_dir_all(&self.dir).map_err(|e| Self::unavailable(key, e))?;

        // Readers only ever see a complete document.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).map_err(|e| Self::unavailable(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| Self::unavailable(key, e))?;
        info!("Saved '{key}' to {:?}", path);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::unavailable(key, e)),
        }
    }

    fn validate(&self, value: &T) -> Result<(), SchemaError> {
        (self.validator)(value)
    }
}

pub fn create_storage_service<T>(
    kind: StorageKind,
    dir: &Path,
    validator: Validator<T>,
) -> Box<dyn StorageService<T>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    info!("Using {kind} storage");
    match kind {
        StorageKind::LocalStorage => Box::new(LocalStorage::new(dir, validator)),
        StorageKind::InMemory => Box::new(InMemoryStorage::new(validator)),
    }
}
