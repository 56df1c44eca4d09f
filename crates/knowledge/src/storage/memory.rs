//! In-process object store.
//!
//! Backs tests and local demos. Objects can be inserted, removed or marked
//! unreadable at runtime, and the whole store can be switched offline to
//! exercise the unreachable-storage path.

use super::{Listing, ObjectMeta, ObjectStore};
use mentor_core::{AppError, AppResult};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    unreadable: Mutex<HashSet<String>>,
    unlistable: Mutex<HashSet<String>>,
    offline: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert(key.into(), body.into());
    }

    pub fn remove(&self, key: &str) {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.remove(key);
    }

    /// Listed, but every `get` fails.
    pub fn mark_unreadable(&self, key: impl Into<String>) {
        let mut unreadable = self.unreadable.lock().unwrap_or_else(|e| e.into_inner());
        unreadable.insert(key.into());
    }

    /// Objects under `prefix` drop out of listings, which report the
    /// prefix as unreadable instead.
    pub fn mark_unlistable(&self, prefix: impl Into<String>) {
        let mut unlistable = self.unlistable.lock().unwrap_or_else(|e| e.into_inner());
        unlistable.insert(prefix.into());
    }

    pub fn clear_unlistable(&self) {
        let mut unlistable = self.unlistable.lock().unwrap_or_else(|e| e.into_inner());
        unlistable.clear();
    }

    /// Simulate the store going away (or coming back).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn list(&self, prefix: &str) -> AppResult<Listing> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::StorageUnreachable(
                "memory store is offline".to_string(),
            ));
        }

        let mut unreadable: Vec<String> = {
            let unlistable = self.unlistable.lock().unwrap_or_else(|e| e.into_inner());
            unlistable
                .iter()
                .filter(|hidden| hidden.starts_with(prefix))
                .cloned()
                .collect()
        };
        unreadable.sort();

        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let objects = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| !unreadable.iter().any(|hidden| key.starts_with(hidden.as_str())))
            .map(|(key, body)| ObjectMeta {
                key: key.clone(),
                size: body.len() as u64,
            })
            .collect();

        Ok(Listing {
            objects,
            unreadable,
        })
    }

    async fn get(&self, key: &str) -> AppResult<Vec<u8>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!("{}: store is offline", key)));
        }
        {
            let unreadable = self.unreadable.lock().unwrap_or_else(|e| e.into_inner());
            if unreadable.contains(key) {
                return Err(AppError::Storage(format!("{}: permission denied", key)));
            }
        }

        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::Storage(format!("{}: no such object", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_list_get() {
        let store = MemoryObjectStore::new();
        store.put("docs/b.md", "B");
        store.put("docs/a.md", "A");
        store.put("private/c.md", "C");

        let keys: Vec<String> = store
            .list("docs/")
            .await
            .unwrap()
            .objects
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["docs/a.md", "docs/b.md"]);
        assert_eq!(store.get("docs/a.md").await.unwrap(), b"A");
    }

    #[tokio::test]
    async fn test_offline_and_unreadable() {
        let store = MemoryObjectStore::new();
        store.put("docs/a.md", "A");
        store.mark_unreadable("docs/a.md");

        assert!(matches!(
            store.get("docs/a.md").await,
            Err(AppError::Storage(_))
        ));

        store.set_offline(true);
        assert!(matches!(
            store.list("docs/").await,
            Err(AppError::StorageUnreachable(_))
        ));

        store.set_offline(false);
        assert_eq!(store.list("docs/").await.unwrap().objects.len(), 1);
    }

    #[tokio::test]
    async fn test_unlistable_prefix_is_reported() {
        let store = MemoryObjectStore::new();
        store.put("docs/a.md", "A");
        store.put("docs/exams/schedule.md", "S");
        store.mark_unlistable("docs/exams/");

        let listing = store.list("docs/").await.unwrap();
        assert_eq!(listing.objects.len(), 1);
        assert_eq!(listing.objects[0].key, "docs/a.md");
        assert_eq!(listing.unreadable, vec!["docs/exams/"]);

        store.clear_unlistable();
        let listing = store.list("docs/").await.unwrap();
        assert_eq!(listing.objects.len(), 2);
        assert!(listing.unreadable.is_empty());
    }
}
