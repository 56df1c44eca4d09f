//! Embedding index with copy-on-write generations.
//!
//! An `IndexGeneration` is immutable once built. The `Indexer` keeps the
//! active generation behind a single swappable `Arc`: queries clone the
//! pointer and search without holding any lock, while a refresh builds the
//! next generation off to the side and swaps it in when complete.

pub mod ann;

use crate::embeddings::{Embedder, EmbeddingOrigin};
use crate::store::DocumentStore;
use crate::types::{Document, EmbeddingRecord, RefreshReport, RetrievalResult, ScoredDocument};
use ann::AnnIndex;
use chrono::{DateTime, Utc};
use mentor_core::{AppError, AppResult};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::Instrument;

/// One fully built, immutable version of the index.
#[derive(Debug)]
pub struct IndexGeneration {
    id: u64,
    built_at: DateTime<Utc>,
    model_version: String,
    records: Vec<EmbeddingRecord>,
    vectors: Vec<Vec<f32>>,
    ann: AnnIndex,
}

impl IndexGeneration {
    /// Build a generation from records sorted by document id.
    pub fn build(
        id: u64,
        model_version: impl Into<String>,
        records: Vec<EmbeddingRecord>,
        exact_threshold: usize,
        n_probe: usize,
    ) -> Self {
        let vectors: Vec<Vec<f32>> = records.iter().map(|r| ann::normalized(&r.vector)).collect();
        let ann = AnnIndex::build(&vectors, exact_threshold, n_probe);

        Self {
            id,
            built_at: Utc::now(),
            model_version: model_version.into(),
            records,
            vectors,
            ann,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ann_kind(&self) -> &'static str {
        self.ann.kind()
    }

    pub fn record(&self, document_id: &str) -> Option<&EmbeddingRecord> {
        self.records
            .binary_search_by(|r| r.document_id.as_str().cmp(document_id))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    /// Cosine-similarity search, descending by score, at most `k` hits.
    pub fn search(&self, query: &[f32], k: usize) -> RetrievalResult {
        let hits = self
            .ann
            .search(&self.vectors, query, k)
            .into_iter()
            .map(|(i, score)| ScoredDocument {
                document_id: self.records[i].document_id.clone(),
                score,
            })
            .collect();

        RetrievalResult { hits }
    }
}

/// Snapshot of the index for diagnostics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexStatus {
    pub generation: Option<u64>,
    pub documents: usize,
    pub built_at: Option<DateTime<Utc>>,
    pub model_version: String,
    pub ann: &'static str,

    /// Storage was unreachable since the last successful refresh
    pub stale: bool,

    /// Documents left out of the active generation
    pub degraded: Vec<String>,
}

/// Builds generations and serves searches from the active one.
pub struct Indexer {
    store: Arc<DocumentStore>,
    embedder: Arc<Embedder>,
    active: RwLock<Option<Arc<IndexGeneration>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    stale: AtomicBool,
    degraded: RwLock<Vec<String>>,
    exact_threshold: usize,
    n_probe: usize,
}

impl Indexer {
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<Embedder>,
        exact_threshold: usize,
        n_probe: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            active: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            stale: AtomicBool::new(false),
            degraded: RwLock::new(Vec::new()),
            exact_threshold,
            n_probe,
        }
    }

    /// The active generation, if one has been built.
    pub fn current(&self) -> Option<Arc<IndexGeneration>> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Search the active generation.
    ///
    /// Returns `AppError::IndexUnavailable` before the first generation exists.
    pub fn search(&self, query: &[f32], k: usize) -> AppResult<RetrievalResult> {
        let generation = self
            .current()
            .ok_or_else(|| AppError::IndexUnavailable("no index generation built yet".to_string()))?;

        if query.len() != self.embedder.dimensions() {
            return Err(AppError::Embedding(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.embedder.dimensions()
            )));
        }

        Ok(generation.search(query, k))
    }

    /// Flag the index as possibly out of date (storage could not be read).
    pub fn mark_stale(&self) {
        if !self.stale.swap(true, Ordering::SeqCst) {
            tracing::warn!("Index marked stale: storage unreachable, serving previous generation");
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Whether the last refresh left any document out.
    pub fn is_degraded(&self) -> bool {
        !self
            .degraded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    pub fn status(&self) -> IndexStatus {
        let generation = self.current();
        IndexStatus {
            generation: generation.as_ref().map(|g| g.id()),
            documents: generation.as_ref().map(|g| g.len()).unwrap_or(0),
            built_at: generation.as_ref().map(|g| g.built_at()),
            model_version: self.embedder.model_version().to_string(),
            ann: generation.as_ref().map(|g| g.ann_kind()).unwrap_or("none"),
            stale: self.is_stale(),
            degraded: self
                .degraded
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    /// Build a new generation from the store's active documents and swap it in.
    ///
    /// Vectors from the active generation are reused for documents that are
    /// not in `changed_ids` and whose content hash still matches; everything
    /// else goes through the embedder. Documents whose embedding fails are
    /// left out of the new generation. Concurrent calls run one at a time.
    pub async fn refresh(
        &self,
        changed_ids: &[String],
        removed_ids: &[String],
    ) -> AppResult<RefreshReport> {
        let span = tracing::info_span!(
            "refresh",
            changed = changed_ids.len(),
            removed = removed_ids.len()
        );
        self.refresh_inner(changed_ids, removed_ids)
            .instrument(span)
            .await
    }

    async fn refresh_inner(
        &self,
        changed_ids: &[String],
        removed_ids: &[String],
    ) -> AppResult<RefreshReport> {
        let _guard = self.refresh_lock.lock().await;

        let previous = self.current();
        let model_version = self.embedder.model_version().to_string();
        let changed: HashSet<&str> = changed_ids.iter().map(String::as_str).collect();
        let removed: HashSet<&str> = removed_ids.iter().map(String::as_str).collect();

        let reusable: HashMap<&str, &EmbeddingRecord> = previous
            .as_ref()
            .filter(|g| g.model_version() == model_version)
            .map(|g| {
                g.records()
                    .iter()
                    .map(|r| (r.document_id.as_str(), r))
                    .collect()
            })
            .unwrap_or_default();

        let documents: Vec<Document> = self
            .store
            .active_documents()?
            .into_iter()
            .filter(|d| !removed.contains(d.id.as_str()))
            .collect();

        let mut report = RefreshReport::default();
        let mut records: Vec<EmbeddingRecord> = Vec::with_capacity(documents.len());
        let mut pending: Vec<&Document> = Vec::new();

        for doc in &documents {
            match reusable.get(doc.id.as_str()) {
                Some(record)
                    if !changed.contains(doc.id.as_str())
                        && record.content_hash == doc.content_hash =>
                {
                    records.push((*record).clone());
                    report.reused += 1;
                }
                _ => pending.push(doc),
            }
        }

        let embedded = futures::future::join_all(
            pending
                .iter()
                .map(|doc| self.embedder.embed_content(&doc.content_hash, &doc.content)),
        )
        .await;

        for (doc, result) in pending.iter().zip(embedded) {
            match result {
                Ok((vector, origin)) => {
                    match origin {
                        EmbeddingOrigin::Model => report.embedded += 1,
                        EmbeddingOrigin::Cache | EmbeddingOrigin::Store => report.cached += 1,
                    }
                    records.push(EmbeddingRecord {
                        document_id: doc.id.clone(),
                        content_hash: doc.content_hash.clone(),
                        vector,
                        model_version: model_version.clone(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Degraded coverage: {} left out of index: {}", doc.id, e);
                    report.failed.push(doc.id.clone());
                }
            }
        }

        records.sort_by(|a, b| a.document_id.cmp(&b.document_id));

        let id = previous.as_ref().map(|g| g.id() + 1).unwrap_or(1);
        let exact_threshold = self.exact_threshold;
        let n_probe = self.n_probe;
        let build_version = model_version.clone();
        let generation = tokio::task::spawn_blocking(move || {
            IndexGeneration::build(id, build_version, records, exact_threshold, n_probe)
        })
        .await
        .map_err(|e| AppError::Other(format!("index build task failed: {}", e)))?;

        report.generation = generation.id();
        report.indexed = generation.len();

        {
            let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
            *active = Some(Arc::new(generation));
        }
        *self.degraded.write().unwrap_or_else(|e| e.into_inner()) = report.failed.clone();
        self.stale.store(false, Ordering::SeqCst);

        tracing::info!(
            generation = report.generation,
            indexed = report.indexed,
            reused = report.reused,
            cached = report.cached,
            embedded = report.embedded,
            failed = report.failed.len(),
            "Index generation active"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLayer;
    use crate::embeddings::EmbeddingProvider;
    use crate::pool::WorkerPool;
    use crate::types::content_hash;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Maps known words onto fixed axes; "poison" fails.
    #[derive(Debug, Default)]
    struct AxisProvider {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn provider_name(&self) -> &str {
            "axis"
        }

        fn model_name(&self) -> &str {
            "v1"
        }

        fn dimensions(&self) -> usize {
            3
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            texts
                .iter()
                .map(|t| {
                    if t.contains("poison") {
                        return Err(AppError::Embedding("model rejected input".to_string()));
                    }
                    Ok(vec![
                        t.matches("exam").count() as f32,
                        t.matches("refund").count() as f32,
                        t.matches("campus").count() as f32 + 0.1,
                    ])
                })
                .collect()
        }
    }

    struct Fixture {
        store: Arc<DocumentStore>,
        provider: Arc<AxisProvider>,
        indexer: Indexer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        let provider = Arc::new(AxisProvider::default());
        let embedder = Arc::new(Embedder::new(
            provider.clone(),
            Arc::new(CacheLayer::new(64, 64, Duration::from_secs(60))),
            store.clone(),
            WorkerPool::new(2),
        ));
        let indexer = Indexer::new(store.clone(), embedder, 512, 4);
        Fixture {
            store,
            provider,
            indexer,
        }
    }

    fn put(store: &DocumentStore, id: &str, content: &str) {
        store
            .upsert_document(&Document {
                id: id.to_string(),
                source_path: format!("docs/{}.md", id),
                content: content.to_string(),
                content_hash: content_hash(content),
                chapter: None,
                tags: vec![],
                version: 1,
                removed: false,
                updated_at: Utc::now(),
            })
            .unwrap();
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_search_before_first_generation() {
        let f = fixture();
        let err = f.indexer.search(&[1.0, 0.0, 0.0], 3).unwrap_err();
        assert!(matches!(err, AppError::IndexUnavailable(_)));
        assert_eq!(f.indexer.status().generation, None);
    }

    #[tokio::test]
    async fn test_refresh_and_search() {
        let f = fixture();
        put(&f.store, "exams", "exam exam schedule");
        put(&f.store, "refunds", "refund policy");

        let report = f.indexer.refresh(&ids(&["exams", "refunds"]), &[]).await.unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(report.indexed, 2);
        assert_eq!(report.embedded, 2);

        let result = f.indexer.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(result.hits[0].document_id, "exams");
        assert!(result.len() <= 5);
        assert!(result.hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_unchanged_documents_are_reused() {
        let f = fixture();
        put(&f.store, "exams", "exam schedule");
        put(&f.store, "refunds", "refund policy");
        f.indexer.refresh(&ids(&["exams", "refunds"]), &[]).await.unwrap();
        let calls = f.provider.calls.load(Ordering::SeqCst);

        put(&f.store, "refunds", "refund refund policy updated");
        let report = f.indexer.refresh(&ids(&["refunds"]), &[]).await.unwrap();
        assert_eq!(report.generation, 2);
        assert_eq!(report.reused, 1);
        assert_eq!(report.embedded, 1);
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), calls + 1);

        let generation = f.indexer.current().unwrap();
        assert_eq!(
            generation.record("refunds").unwrap().content_hash,
            content_hash("refund refund policy updated")
        );
    }

    #[tokio::test]
    async fn test_removed_documents_leave_the_index() {
        let f = fixture();
        put(&f.store, "exams", "exam schedule");
        put(&f.store, "refunds", "refund policy");
        f.indexer.refresh(&ids(&["exams", "refunds"]), &[]).await.unwrap();

        f.store.mark_removed("refunds").unwrap();
        let report = f.indexer.refresh(&[], &ids(&["refunds"])).await.unwrap();
        assert_eq!(report.indexed, 1);

        let result = f.indexer.search(&[0.0, 1.0, 0.0], 5).unwrap();
        assert_eq!(result.document_ids(), vec!["exams"]);
    }

    #[tokio::test]
    async fn test_failed_embedding_is_degraded_coverage() {
        let f = fixture();
        put(&f.store, "exams", "exam schedule");
        put(&f.store, "broken", "poison pill");

        let report = f.indexer.refresh(&ids(&["exams", "broken"]), &[]).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.failed, vec!["broken"]);
        assert_eq!(f.indexer.status().degraded, vec!["broken"]);
        assert!(f.indexer.current().unwrap().record("broken").is_none());
    }

    #[tokio::test]
    async fn test_readers_keep_their_generation_across_swap() {
        let f = fixture();
        put(&f.store, "exams", "exam schedule");
        f.indexer.refresh(&ids(&["exams"]), &[]).await.unwrap();
        let held = f.indexer.current().unwrap();

        put(&f.store, "refunds", "refund policy");
        f.indexer.refresh(&ids(&["refunds"]), &[]).await.unwrap();

        assert_eq!(held.id(), 1);
        assert_eq!(held.len(), 1);
        assert_eq!(f.indexer.current().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_flag_cleared_by_refresh() {
        let f = fixture();
        f.indexer.mark_stale();
        assert!(f.indexer.status().stale);

        f.indexer.refresh(&[], &[]).await.unwrap();
        let status = f.indexer.status();
        assert!(!status.stale);
        assert_eq!(status.generation, Some(1));
        assert_eq!(status.documents, 0);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_serialize() {
        let f = fixture();
        put(&f.store, "exams", "exam schedule");
        let changed = ids(&["exams"]);

        let (a, b) = tokio::join!(
            f.indexer.refresh(&changed, &[]),
            f.indexer.refresh(&changed, &[])
        );
        let mut generations = vec![a.unwrap().generation, b.unwrap().generation];
        generations.sort();
        assert_eq!(generations, vec![1, 2]);
    }
}
