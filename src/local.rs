//! Local store adapter: a persistent key to text mapping on this device
//!
//! Keys are namespaced per identity; see [`tasks_key`] and [`tags_key`].

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::LocalStoreError;
use crate::models::{Tag, Task};

/// Key holding the generated temporary identity
pub const TEMP_USER_KEY: &str = "temp_user_id";

pub fn tasks_key(owner_id: &str) -> String {
    format!("tasks_{}", owner_id)
}

pub fn tags_key(owner_id: &str) -> String {
    format!("tags_{}", owner_id)
}

/// Persistent key to text mapping
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError>;
    fn remove(&self, key: &str) -> Result<(), LocalStoreError>;
}

/// Volatile store, for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file, rewritten on every change
pub struct FileLocalStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileLocalStore {
    /// Open or create the store file
    pub fn open(path: &Path) -> Result<Self, LocalStoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|source| LocalStoreError::Corrupt {
                    key: path.display().to_string(),
                    source,
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<F>(&self, f: F) -> Result<(), LocalStoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = entries.clone();
        f(&mut next);

        // Write to a sibling file first so a crash never leaves half a file
        let content = serde_json::to_string_pretty(&next)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;

        *entries = next;
        Ok(())
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// Parse a JSON array entry; an absent key is an empty list
pub fn load_list<T: DeserializeOwned>(
    store: &dyn LocalStore,
    key: &str,
) -> Result<Vec<T>, LocalStoreError> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|source| LocalStoreError::Corrupt {
            key: key.to_string(),
            source,
        }),
        None => Ok(Vec::new()),
    }
}

pub fn save_list<T: Serialize>(
    store: &dyn LocalStore,
    key: &str,
    items: &[T],
) -> Result<(), LocalStoreError> {
    let raw = serde_json::to_string(items)?;
    store.set(key, &raw)
}

pub fn load_tasks(store: &dyn LocalStore, owner_id: &str) -> Result<Vec<Task>, LocalStoreError> {
    load_list(store, &tasks_key(owner_id))
}

pub fn load_tags(store: &dyn LocalStore, owner_id: &str) -> Result<Vec<Tag>, LocalStoreError> {
    load_list(store, &tags_key(owner_id))
}
