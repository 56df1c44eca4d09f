//! Object storage boundary.
//!
//! The synchronizer mirrors documents from an object store through this
//! trait. A failed `list` means the store is unreachable and the sync cycle
//! is abandoned; a failed `get` only skips that one object.

pub mod fs;
pub mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use mentor_core::AppResult;

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// `/`-separated key, including the prefix
    pub key: String,

    /// Body size in bytes
    pub size: u64,
}

/// Result of listing a prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Objects found, sorted by key
    pub objects: Vec<ObjectMeta>,

    /// Key prefixes that could not be walked. Objects under them are
    /// unknown, not absent.
    pub unreadable: Vec<String>,
}

impl Listing {
    /// Whether `key` lies under a prefix that could not be listed.
    pub fn is_unknown(&self, key: &str) -> bool {
        self.unreadable.iter().any(|prefix| key.starts_with(prefix.as_str()))
    }
}

/// Read-only view of an object store.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// List every object whose key starts with `prefix`, sorted by key.
    ///
    /// Returns `AppError::StorageUnreachable` when the store cannot be listed
    /// at all. Parts that fail below the root are reported in
    /// `Listing::unreadable`.
    async fn list(&self, prefix: &str) -> AppResult<Listing>;

    /// Read one object body.
    ///
    /// Returns `AppError::Storage` when this object cannot be read.
    async fn get(&self, key: &str) -> AppResult<Vec<u8>>;
}

/// Map an object key to a document id: prefix stripped, extension dropped.
///
/// `docs/exams/schedule.md` under prefix `docs/` becomes `exams/schedule`.
pub fn document_id_for_key(prefix: &str, key: &str) -> String {
    let relative = key.strip_prefix(prefix).unwrap_or(key);
    let relative = relative.trim_start_matches('/');

    let file_start = relative.rfind('/').map(|i| i + 1).unwrap_or(0);
    match relative[file_start..].rfind('.') {
        Some(dot) if dot > 0 => relative[..file_start + dot].to_string(),
        _ => relative.to_string(),
    }
}
