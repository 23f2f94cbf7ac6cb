use std::collections::HashMap;

use regex::Regex;
use tokio::sync::RwLock;

use super::StorageError;

/// In-memory storage: a path → payload map. Used by tests and available as
/// the `"memory"` config type for throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) async fn put(&self, path: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let mut entries = self.entries.write().await;
        entries.insert(path.to_string(), bytes.to_vec());
        Ok(path.to_string())
    }

    pub(super) async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let entries = self.entries.read().await;
        entries
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    pub(super) async fn list(&self, dir: &str, pattern: Option<&Regex>) -> Vec<String> {
        let entries = self.entries.read().await;
        entries
            .keys()
            .filter(|path| path.starts_with(dir))
            .filter(|path| match pattern {
                Some(pattern) => {
                    let basename = path.rsplit('/').next().unwrap_or(path.as_str());
                    pattern.is_match(basename)
                }
                None => true,
            })
            .cloned()
            .collect()
    }

    pub(super) async fn exists(&self, path: &str) -> bool {
        self.entries.read().await.contains_key(path)
    }

    pub(super) async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.entries.write().await.remove(path).is_some())
    }

    pub(super) async fn rename(&self, src: &str, dst: &str) -> Result<bool, StorageError> {
        let mut entries = self.entries.write().await;
        match entries.remove(src) {
            Some(payload) => {
                entries.insert(dst.to_string(), payload);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
