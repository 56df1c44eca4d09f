//! Directory-backed object store.
//!
//! Mirrors a bucket that has been mounted or synced to local disk. Keys are
//! paths relative to the root with `/` separators.

use super::{Listing, ObjectMeta, ObjectStore};
use mentor_core::{AppError, AppResult};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key under the root, refusing keys that escape it.
    fn resolve(&self, key: &str) -> AppResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(AppError::Storage(format!("Invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

fn key_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// The part of `prefix` a failed path hides: the path itself when it lies
/// under the prefix, the whole prefix when it is an ancestor of it.
fn hidden_prefix(root: &Path, path: Option<&Path>, prefix: &str) -> Option<String> {
    let Some(key) = path.and_then(|p| key_for(root, p)) else {
        return Some(prefix.to_string());
    };

    if key.starts_with(prefix) {
        Some(key)
    } else if prefix == key || prefix.starts_with(&format!("{}/", key)) {
        Some(prefix.to_string())
    } else {
        None
    }
}

fn list_blocking(root: &Path, prefix: &str) -> AppResult<Listing> {
    if !root.is_dir() {
        return Err(AppError::StorageUnreachable(format!(
            "Storage root {:?} is not a readable directory",
            root
        )));
    }

    let mut objects = Vec::new();
    let mut unreadable = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(AppError::StorageUnreachable(format!(
                    "Failed to list {:?}: {}",
                    root, e
                )));
            }
            Err(e) => {
                tracing::warn!("Unreadable storage entry: {}", e);
                if let Some(hidden) = hidden_prefix(root, e.path(), prefix) {
                    unreadable.push(hidden);
                }
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(key) = key_for(root, entry.path()) else {
            continue;
        };
        if !key.starts_with(prefix) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        objects.push(ObjectMeta { key, size });
    }

    objects.sort_by(|a, b| a.key.cmp(&b.key));
    unreadable.sort();
    unreadable.dedup();
    Ok(Listing {
        objects,
        unreadable,
    })
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn list(&self, prefix: &str) -> AppResult<Listing> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || list_blocking(&root, &prefix))
            .await
            .map_err(|e| AppError::StorageUnreachable(format!("Listing task failed: {}", e)))?
    }

    async fn get(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to read {}: {}", key, e)))
    }
}
