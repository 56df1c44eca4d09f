//! Knowledge base synchronizer.
//!
//! Mirrors documents from object storage into the `DocumentStore`, diffing
//! against the persisted manifest. The synchronizer never touches embeddings;
//! it reports which ids changed so the indexer can rebuild.

use crate::manifest::{KnowledgeBaseManifest, ManifestEntry};
use crate::storage::{document_id_for_key, Listing, ObjectStore};
use crate::store::DocumentStore;
use crate::types::{content_hash, Document, SyncIssue, SyncReport};
use chrono::Utc;
use mentor_core::{AppError, AppResult};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::Instrument;

/// One row of the metadata sidecar.
#[derive(Debug, Clone, Deserialize)]
struct SidecarEntry {
    id: String,

    #[serde(default)]
    chapter: Option<String>,

    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct DocumentMeta {
    chapter: Option<String>,
    tags: Vec<String>,
}

/// Storage-to-store mirror.
pub struct Synchronizer {
    objects: Arc<dyn ObjectStore>,
    store: Arc<DocumentStore>,
    manifest: Mutex<KnowledgeBaseManifest>,
    manifest_path: Option<PathBuf>,
    prefix: String,
    sidecar: String,
}

impl Synchronizer {
    /// Create a synchronizer starting from `manifest`.
    ///
    /// When `manifest_path` is set the manifest is rewritten after every pass
    /// that changes it.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        store: Arc<DocumentStore>,
        manifest: KnowledgeBaseManifest,
        manifest_path: Option<PathBuf>,
        prefix: impl Into<String>,
        sidecar: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            store,
            manifest: Mutex::new(manifest),
            manifest_path,
            prefix: prefix.into(),
            sidecar: sidecar.into(),
        }
    }

    /// Number of documents the manifest currently tracks.
    pub async fn tracked(&self) -> usize {
        self.manifest.lock().await.len()
    }

    /// Run one synchronization pass.
    ///
    /// Returns `AppError::StorageUnreachable` without modifying anything when
    /// the prefix cannot be listed. Per-object failures are collected in the
    /// report and do not abort the pass. Documents under a part of the prefix
    /// that could not be listed are kept. A store failure ends the pass early,
    /// after the manifest has recorded what was already written.
    pub async fn sync(&self) -> AppResult<SyncReport> {
        let span = tracing::info_span!("sync", source = %self.objects.describe());
        self.sync_inner().instrument(span).await
    }

    async fn sync_inner(&self) -> AppResult<SyncReport> {
        // Held for the whole pass so concurrent callers serialize.
        let mut manifest = self.manifest.lock().await;

        let listing = self.objects.list(&self.prefix).await.map_err(|e| {
            tracing::warn!("Object storage listing failed: {}", e);
            match e {
                AppError::StorageUnreachable(msg) => AppError::StorageUnreachable(msg),
                other => AppError::StorageUnreachable(other.to_string()),
            }
        })?;

        let mut report = SyncReport::default();
        for hidden in &listing.unreadable {
            tracing::warn!("Could not list {}, keeping the documents under it", hidden);
            report.errors.push(SyncIssue {
                key: hidden.clone(),
                message: "could not be listed; documents under it are kept".to_string(),
            });
        }

        let mut dirty = false;
        let applied = self
            .apply(&listing, &mut manifest, &mut report, &mut dirty)
            .await;

        // Whatever reached the store is recorded, even when the pass stopped early.
        let saved = match &self.manifest_path {
            Some(path) if dirty => manifest.save(path),
            _ => Ok(()),
        };

        if let Err(e) = &applied {
            tracing::warn!(
                added = report.added.len(),
                updated = report.updated.len(),
                removed = report.removed.len(),
                "Sync stopped partway: {}",
                e
            );
        }
        applied?;
        saved?;

        tracing::info!(
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            unchanged = report.unchanged,
            errors = report.errors.len(),
            "Sync complete"
        );

        Ok(report)
    }

    /// Apply one listing to the store and the manifest.
    ///
    /// Each document is written to the store before the manifest records it,
    /// so an early return leaves the two consistent up to that document.
    async fn apply(
        &self,
        listing: &Listing,
        manifest: &mut KnowledgeBaseManifest,
        report: &mut SyncReport,
        dirty: &mut bool,
    ) -> AppResult<()> {
        let sidecar_key = format!("{}{}", self.prefix, self.sidecar);
        let metadata = if listing.objects.iter().any(|o| o.key == sidecar_key) {
            self.load_sidecar(&sidecar_key, report).await
        } else {
            HashMap::new()
        };

        let mut seen: HashSet<String> = HashSet::new();

        for object in listing.objects.iter().filter(|o| o.key != sidecar_key) {
            let id = document_id_for_key(&self.prefix, &object.key);
            if id.is_empty() {
                continue;
            }

            if !seen.insert(id.clone()) {
                report.errors.push(SyncIssue {
                    key: object.key.clone(),
                    message: format!("duplicate document id '{}'", id),
                });
                continue;
            }

            let content = match self.read_text(&object.key).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Skipping document: {}", e);
                    report.errors.push(SyncIssue {
                        key: object.key.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let meta = metadata.get(&id).cloned().unwrap_or_default();
            let hash = content_hash(&content);

            match manifest.get(&id).cloned() {
                Some(entry) if entry.content_hash == hash => {
                    if entry.chapter != meta.chapter || entry.tags != meta.tags {
                        self.refresh_metadata(manifest, &id, entry, meta)?;
                        *dirty = true;
                    }
                    report.unchanged += 1;
                }
                Some(entry) => {
                    let version = entry.version + 1;
                    self.write(manifest, &id, &object.key, content, hash, meta, version)?;
                    tracing::debug!("Updated {} to version {}", id, version);
                    report.updated.push(id);
                    *dirty = true;
                }
                None => {
                    // A soft-deleted id that comes back continues its version history.
                    let version = match self.store.get_any(&id)? {
                        Some(previous) => previous.version + 1,
                        None => 1,
                    };
                    self.write(manifest, &id, &object.key, content, hash, meta, version)?;
                    tracing::debug!("Added {} at version {}", id, version);
                    report.added.push(id);
                    *dirty = true;
                }
            }
        }

        for id in manifest.ids() {
            if seen.contains(&id) {
                continue;
            }
            let hidden = manifest
                .get(&id)
                .map_or(false, |entry| listing.is_unknown(&entry.source_path));
            if hidden {
                continue;
            }
            self.store.mark_removed(&id)?;
            manifest.remove(&id);
            tracing::debug!("Removed {}", id);
            report.removed.push(id);
            *dirty = true;
        }

        Ok(())
    }

    async fn read_text(&self, key: &str) -> AppResult<String> {
        let bytes = self.objects.get(key).await?;
        let content = String::from_utf8(bytes)
            .map_err(|_| AppError::Sync(format!("{}: content is not valid UTF-8", key)))?;

        if content.trim().is_empty() {
            return Err(AppError::Sync(format!("{}: document is empty", key)));
        }

        Ok(content)
    }

    async fn load_sidecar(
        &self,
        key: &str,
        report: &mut SyncReport,
    ) -> HashMap<String, DocumentMeta> {
        let parsed = match self.objects.get(key).await {
            Ok(bytes) => serde_json::from_slice::<Vec<SidecarEntry>>(&bytes)
                .map_err(|e| format!("malformed metadata sidecar: {}", e)),
            Err(e) => Err(e.to_string()),
        };

        match parsed {
            Ok(entries) => entries
                .into_iter()
                .map(|e| {
                    (
                        e.id,
                        DocumentMeta {
                            chapter: e.chapter,
                            tags: e.tags,
                        },
                    )
                })
                .collect(),
            Err(message) => {
                tracing::warn!("Ignoring metadata sidecar {}: {}", key, message);
                report.errors.push(SyncIssue {
                    key: key.to_string(),
                    message,
                });
                HashMap::new()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &self,
        manifest: &mut KnowledgeBaseManifest,
        id: &str,
        key: &str,
        content: String,
        hash: String,
        meta: DocumentMeta,
        version: u32,
    ) -> AppResult<()> {
        let doc = Document {
            id: id.to_string(),
            source_path: key.to_string(),
            content,
            content_hash: hash.clone(),
            chapter: meta.chapter.clone(),
            tags: meta.tags.clone(),
            version,
            removed: false,
            updated_at: Utc::now(),
        };
        self.store.upsert_document(&doc)?;

        manifest.insert(
            id,
            ManifestEntry {
                content_hash: hash,
                version,
                chapter: meta.chapter,
                tags: meta.tags,
                source_path: key.to_string(),
            },
        );
        Ok(())
    }

    /// Sidecar changed but content did not: keep the version, update the labels.
    fn refresh_metadata(
        &self,
        manifest: &mut KnowledgeBaseManifest,
        id: &str,
        mut entry: ManifestEntry,
        meta: DocumentMeta,
    ) -> AppResult<()> {
        if let Some(mut doc) = self.store.get_document(id)? {
            doc.chapter = meta.chapter.clone();
            doc.tags = meta.tags.clone();
            doc.updated_at = Utc::now();
            self.store.upsert_document(&doc)?;
        }

        entry.chapter = meta.chapter;
        entry.tags = meta.tags;
        manifest.insert(id, entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use tempfile::TempDir;

    struct Fixture {
        objects: Arc<MemoryObjectStore>,
        store: Arc<DocumentStore>,
        sync: Synchronizer,
    }

    fn fixture() -> Fixture {
        let objects = Arc::new(MemoryObjectStore::new());
        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        let sync = Synchronizer::new(
            objects.clone(),
            store.clone(),
            KnowledgeBaseManifest::new(),
            None,
            "docs/",
            "_manifest.json",
        );
        Fixture {
            objects,
            store,
            sync,
        }
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let f = fixture();
        f.objects.put("docs/exams.md", "Exams are held in May.");
        f.objects.put("docs/refunds.md", "Refunds within 14 days.");

        let first = f.sync.sync().await.unwrap();
        assert_eq!(first.added, vec!["exams", "refunds"]);

        let second = f.sync.sync().await.unwrap();
        assert!(!second.has_changes());
        assert_eq!(second.unchanged, 2);
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let f = fixture();
        f.objects.put("docs/exams.md", "Exams are held in May.");
        f.sync.sync().await.unwrap();

        f.objects.put("docs/exams.md", "Exams are held in June.");
        let report = f.sync.sync().await.unwrap();
        assert_eq!(report.updated, vec!["exams"]);

        let doc = f.store.get_document("exams").unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert!(doc.content.contains("June"));
    }

    #[tokio::test]
    async fn test_removed_document_is_soft_deleted() {
        let f = fixture();
        f.objects.put("docs/exams.md", "Exams are held in May.");
        f.sync.sync().await.unwrap();

        f.objects.remove("docs/exams.md");
        let report = f.sync.sync().await.unwrap();
        assert_eq!(report.removed, vec!["exams"]);
        assert!(f.store.get_document("exams").unwrap().is_none());
        assert!(f.store.get_any("exams").unwrap().unwrap().removed);

        f.objects.put("docs/exams.md", "Exams are back.");
        let report = f.sync.sync().await.unwrap();
        assert_eq!(report.added, vec!["exams"]);
        assert_eq!(f.store.get_document("exams").unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_bad_objects_are_skipped_not_removed() {
        let f = fixture();
        f.objects.put("docs/exams.md", "Exams are held in May.");
        f.sync.sync().await.unwrap();

        f.objects.mark_unreadable("docs/exams.md");
        f.objects.put("docs/empty.md", "   ");
        f.objects.put("docs/binary.bin", vec![0xffu8, 0xfe, 0x00]);

        let report = f.sync.sync().await.unwrap();
        assert!(!report.has_changes());
        assert_eq!(report.errors.len(), 3);
        assert!(f.store.get_document("exams").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_storage_applies_nothing() {
        let f = fixture();
        f.objects.put("docs/exams.md", "Exams are held in May.");
        f.sync.sync().await.unwrap();

        f.objects.set_offline(true);
        let err = f.sync.sync().await.unwrap_err();
        assert!(matches!(err, AppError::StorageUnreachable(_)));
        assert!(f.store.get_document("exams").unwrap().is_some());
        assert_eq!(f.sync.tracked().await, 1);
    }

    #[tokio::test]
    async fn test_unlistable_prefix_keeps_documents() {
        let f = fixture();
        f.objects.put("docs/exams/schedule.md", "Exams are held in May.");
        f.objects.put("docs/refunds.md", "Refunds within 14 days.");
        f.sync.sync().await.unwrap();

        f.objects.mark_unlistable("docs/exams/");
        let report = f.sync.sync().await.unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].key, "docs/exams/");
        assert!(f.store.get_document("exams/schedule").unwrap().is_some());
        assert_eq!(f.sync.tracked().await, 2);

        f.objects.clear_unlistable();
        f.objects.remove("docs/exams/schedule.md");
        let report = f.sync.sync().await.unwrap();
        assert_eq!(report.removed, vec!["exams/schedule"]);
    }

    #[tokio::test]
    async fn test_failed_pass_keeps_written_changes_in_manifest() {
        let temp = TempDir::new().unwrap();
        let manifest_path = temp.path().join("manifest.json");
        let objects = Arc::new(MemoryObjectStore::new());
        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        let sync = Synchronizer::new(
            objects.clone(),
            store.clone(),
            KnowledgeBaseManifest::new(),
            Some(manifest_path.clone()),
            "docs/",
            "_manifest.json",
        );

        objects.put("docs/a.md", "Alpha first draft.");
        objects.put("docs/b.md", "Bravo.");
        sync.sync().await.unwrap();

        objects.put("docs/a.md", "Alpha second draft.");
        objects.put("docs/c.md", "Charlie.");
        store.run_sql(
            "CREATE TRIGGER reject_c BEFORE INSERT ON documents WHEN NEW.id = 'c'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        );
        assert!(sync.sync().await.is_err());

        let saved = KnowledgeBaseManifest::load(&manifest_path).unwrap();
        assert_eq!(saved.get("a").unwrap().version, 2);
        assert!(saved.get("c").is_none());
        assert_eq!(store.get_document("a").unwrap().unwrap().version, 2);

        store.run_sql("DROP TRIGGER reject_c;");
        let report = sync.sync().await.unwrap();
        assert_eq!(report.added, vec!["c"]);
        assert!(report.updated.is_empty());
        assert_eq!(report.unchanged, 2);
    }

    #[tokio::test]
    async fn test_sidecar_metadata_is_merged() {
        let f = fixture();
        f.objects.put("docs/exams.md", "Exams are held in May.");
        f.objects.put(
            "docs/_manifest.json",
            r#"[{"id":"exams","chapter":"Assessment","tags":["exams","schedule"]}]"#,
        );

        let report = f.sync.sync().await.unwrap();
        assert_eq!(report.added, vec!["exams"]);

        let doc = f.store.get_document("exams").unwrap().unwrap();
        assert_eq!(doc.chapter.as_deref(), Some("Assessment"));
        assert_eq!(doc.tags, vec!["exams", "schedule"]);

        f.objects.put(
            "docs/_manifest.json",
            r#"[{"id":"exams","chapter":"Exams","tags":[]}]"#,
        );
        let report = f.sync.sync().await.unwrap();
        assert!(!report.has_changes());
        let doc = f.store.get_document("exams").unwrap().unwrap();
        assert_eq!(doc.chapter.as_deref(), Some("Exams"));
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn test_malformed_sidecar_is_reported() {
        let f = fixture();
        f.objects.put("docs/exams.md", "Exams are held in May.");
        f.objects.put("docs/_manifest.json", "{oops");

        let report = f.sync.sync().await.unwrap();
        assert_eq!(report.added, vec!["exams"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].key, "docs/_manifest.json");
    }

    #[tokio::test]
    async fn test_manifest_persists_between_instances() {
        let temp = TempDir::new().unwrap();
        let manifest_path = temp.path().join("manifest.json");
        let objects = Arc::new(MemoryObjectStore::new());
        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        objects.put("docs/exams.md", "Exams are held in May.");

        let first = Synchronizer::new(
            objects.clone(),
            store.clone(),
            KnowledgeBaseManifest::new(),
            Some(manifest_path.clone()),
            "docs/",
            "_manifest.json",
        );
        first.sync().await.unwrap();

        let second = Synchronizer::new(
            objects,
            store,
            KnowledgeBaseManifest::load(&manifest_path).unwrap(),
            Some(manifest_path),
            "docs/",
            "_manifest.json",
        );
        let report = second.sync().await.unwrap();
        assert!(!report.has_changes());
        assert_eq!(report.unchanged, 1);
    }
}
