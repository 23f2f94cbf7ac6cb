//! Object-addressed byte storage.
//!
//! Paths are hierarchical strings with `/` separators on every backend.
//! `put` makes the full path atomically visible; files are write-once and
//! only ever removed whole, never mutated in place.

mod filesystem;
mod memory;

pub use filesystem::FilesystemStorage;
pub use memory::MemoryStorage;

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::config::{Config, ConfigError, StorageConfig};

/// Registry key of the fallback storage shared by all providers without an
/// override.
pub const GLOBAL_STORAGE: &str = "global";

/// A storage backend handle. Dispatches the six contract operations to the
/// concrete backend.
#[derive(Debug)]
pub enum Storage {
    Filesystem(FilesystemStorage),
    Memory(MemoryStorage),
}

impl Storage {
    /// Store `bytes` under `path`, atomically with respect to full-path
    /// visibility. Returns the path on success.
    pub async fn put(&self, path: &str, bytes: &[u8]) -> Result<String, StorageError> {
        match self {
            Storage::Filesystem(fs) => fs.put(path, bytes).await,
            Storage::Memory(mem) => mem.put(path, bytes).await,
        }
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        match self {
            Storage::Filesystem(fs) => fs.get(path).await,
            Storage::Memory(mem) => mem.get(path).await,
        }
    }

    /// List paths under the `dir` prefix, optionally filtered by a regex
    /// over the basename. Order is unspecified; a missing directory is
    /// simply empty.
    pub async fn list(&self, dir: &str, pattern: Option<&Regex>) -> Vec<String> {
        match self {
            Storage::Filesystem(fs) => fs.list(dir, pattern).await,
            Storage::Memory(mem) => mem.list(dir, pattern).await,
        }
    }

    pub async fn exists(&self, path: &str) -> bool {
        match self {
            Storage::Filesystem(fs) => fs.exists(path).await,
            Storage::Memory(mem) => mem.exists(path).await,
        }
    }

    /// Remove `path`. Returns whether anything was removed.
    pub async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        match self {
            Storage::Filesystem(fs) => fs.delete(path).await,
            Storage::Memory(mem) => mem.delete(path).await,
        }
    }

    /// Move `src` to `dst`. Returns `false` when `src` does not exist.
    pub async fn rename(&self, src: &str, dst: &str) -> Result<bool, StorageError> {
        match self {
            Storage::Filesystem(fs) => fs.rename(src, dst).await,
            Storage::Memory(mem) => mem.rename(src, dst).await,
        }
    }
}

/// Build one backend from its config section.
pub fn create_storage(config: &StorageConfig) -> Result<Storage, ConfigError> {
    match config.kind.as_str() {
        "filesystem" => {
            let root = config
                .params
                .root
                .clone()
                .ok_or_else(|| ConfigError::MissingStorageRoot(config.kind.clone()))?;
            Ok(Storage::Filesystem(FilesystemStorage::new(root)))
        }
        "memory" => Ok(Storage::Memory(MemoryStorage::new())),
        other => Err(ConfigError::UnknownStorageType(other.to_string())),
    }
}

/// Provider name → storage handle, with a `"global"` fallback entry.
/// Read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct StorageRegistry {
    storages: HashMap<String, Arc<Storage>>,
}

impl StorageRegistry {
    /// One storage per provider override plus the global default.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut storages = HashMap::new();
        storages.insert(
            GLOBAL_STORAGE.to_string(),
            Arc::new(create_storage(&config.storage)?),
        );
        for provider in &config.providers {
            if let Some(storage_config) = &provider.storage {
                storages.insert(
                    provider.name.clone(),
                    Arc::new(create_storage(storage_config)?),
                );
            }
        }
        Ok(Self { storages })
    }

    pub fn insert(&mut self, name: impl Into<String>, storage: Arc<Storage>) {
        self.storages.insert(name.into(), storage);
    }

    /// Provider-specific storage, falling back to the global entry.
    pub fn for_provider(&self, provider_name: &str) -> Option<Arc<Storage>> {
        self.storages
            .get(provider_name)
            .or_else(|| self.storages.get(GLOBAL_STORAGE))
            .cloned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        source: std::io::Error,
    },
}
