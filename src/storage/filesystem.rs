use std::path::{Path, PathBuf};

use regex::Regex;

use super::StorageError;

/// Storage rooted at a local directory. Keys map to paths below the root;
/// `put` stages into a hidden temp file and renames it into place so readers
/// never observe partial writes.
#[derive(Debug)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    pub(super) async fn put(&self, path: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error("put", path, source))?;
        }

        let temp = staging_path(&target);
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|source| io_error("put", path, source))?;
        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|source| io_error("put", path, source))?;

        Ok(path.to_string())
    }

    pub(super) async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(source) => Err(io_error("get", path, source)),
        }
    }

    /// `dir` is a string prefix over keys, not necessarily a directory: the
    /// walk starts at the deepest directory the prefix names in full and
    /// recurses from there, so `"provider/"` finds files any number of
    /// levels down, exactly like the in-memory backend's key filter.
    pub(super) async fn list(&self, dir: &str, pattern: Option<&Regex>) -> Vec<String> {
        let base = match dir.rfind('/') {
            Some(idx) => &dir[..idx],
            None => "",
        };
        let start = if base.is_empty() {
            self.root.clone()
        } else {
            self.root.join(base)
        };

        let mut paths = Vec::new();
        let mut pending = vec![start];
        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let Some(key) = self.key_for(&entry.path()) else {
                    continue;
                };
                if !key.starts_with(dir) {
                    continue;
                }
                let basename = key.rsplit('/').next().unwrap_or(&key);
                if hidden_staging_name(basename) {
                    continue;
                }
                if let Some(pattern) = pattern {
                    if !pattern.is_match(basename) {
                        continue;
                    }
                }
                paths.push(key);
            }
        }
        paths
    }

    /// Storage key of an absolute path below the root, `/`-separated.
    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let components: Vec<&str> = relative
            .iter()
            .map(|c| c.to_str())
            .collect::<Option<_>>()?;
        Some(components.join("/"))
    }

    pub(super) async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.resolve(path))
            .await
            .unwrap_or(false)
    }

    pub(super) async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(io_error("delete", path, source)),
        }
    }

    pub(super) async fn rename(&self, src: &str, dst: &str) -> Result<bool, StorageError> {
        let source_path = self.resolve(src);
        if !tokio::fs::try_exists(&source_path).await.unwrap_or(false) {
            return Ok(false);
        }
        let target = self.resolve(dst);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error("rename", dst, source))?;
        }
        tokio::fs::rename(&source_path, &target)
            .await
            .map_err(|source| io_error("rename", src, source))?;
        Ok(true)
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    target.with_file_name(format!(".staging.{name}"))
}

fn hidden_staging_name(name: &str) -> bool {
    name.starts_with(".staging.")
}

fn io_error(op: &'static str, path: &str, source: std::io::Error) -> StorageError {
    StorageError::Io {
        op,
        path: path.to_string(),
        source,
    }
}
