//! # Identity
//!
//! Remembers which group this client belongs to, across restarts.
//!
//! - Stored outside the document store, in local key/value storage
//! - "Leave group" saves an empty value, an empty value reads back as no group
//! - Storage failures never take the session down, they read as no group
use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use bank::GroupKey;
use tracing::{debug, warn};

pub const GROUP_KEY_ITEM: &str = "groupKey";

pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> io::Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> io::Result<()>;
}

/// One file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), value)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> io::Result<Option<String>> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> io::Result<()> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.to_string(), value.to_string());

        Ok(())
    }
}

#[derive(Clone)]
pub struct IdentityStore {
    storage: Arc<dyn LocalStorage>,
}

impl IdentityStore {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self { storage }
    }

    pub fn load(&self) -> Option<GroupKey> {
        let raw = self
            .storage
            .get_item(GROUP_KEY_ITEM)
            .map_err(|e| {
                warn!("Failed to read saved group key: {e}");
            })
            .ok()
            .flatten()?;

        if raw.trim().is_empty() {
            return None;
        }

        GroupKey::parse(&raw)
            .map_err(|e| {
                warn!("Ignoring saved group key: {e}");
            })
            .ok()
    }

    pub fn save(&self, key: &GroupKey) {
        self.write(key.as_str());
    }

    pub fn clear(&self) {
        self.write("");
    }

    fn write(&self, value: &str) {
        match self.storage.set_item(GROUP_KEY_ITEM, value) {
            Ok(()) => debug!("Saved group key {value:?}"),
            Err(e) => warn!("Failed to save group key: {e}"),
        }
    }
}
