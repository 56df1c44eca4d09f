//! Chatbot engine facade.
//!
//! Wires the store, synchronizer, embedder, indexer, caches and router
//! together from explicitly supplied collaborators. Nothing here is a
//! process-wide singleton; tests build engines with fake models.

use crate::cache::{CacheLayer, CacheLayerStats};
use crate::config::{self, KnowledgeBaseConfig};
use crate::embeddings::{create_provider, Embedder, EmbeddingProvider};
use crate::faq::{FaqCatalog, FaqMatcher};
use crate::generator::ResponseGenerator;
use crate::index::{IndexStatus, Indexer};
use crate::manifest::KnowledgeBaseManifest;
use crate::pool::WorkerPool;
use crate::retriever::Retriever;
use crate::router::QueryRouter;
use crate::storage::{FsObjectStore, ObjectStore};
use crate::store::DocumentStore;
use crate::sync::Synchronizer;
use crate::types::{ChatRequest, ChatResponse, RefreshReport, SyncReport};
use chrono::{DateTime, Utc};
use mentor_core::{AppError, AppResult};
use mentor_llm::{create_client, LlmClient};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Result of one sync-and-refresh cycle.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CycleReport {
    pub sync: SyncReport,

    /// Present when a new index generation was built
    pub refresh: Option<RefreshReport>,
}

/// Engine diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub base: String,
    pub active_documents: u32,
    pub removed_documents: u32,
    pub persisted_embeddings: u32,
    pub index: IndexStatus,
    pub cache: CacheLayerStats,
    pub workers: usize,
    pub in_flight: usize,
    pub embedding_calls: u64,
    pub generation_calls: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

pub struct ChatbotEngine {
    config: KnowledgeBaseConfig,
    store: Arc<DocumentStore>,
    cache: Arc<CacheLayer>,
    pool: WorkerPool,
    embedder: Arc<Embedder>,
    indexer: Arc<Indexer>,
    retriever: Arc<Retriever>,
    generator: Arc<ResponseGenerator>,
    synchronizer: Synchronizer,
    router: QueryRouter,
    cycle_lock: Mutex<()>,
    /// Set when the store may hold changes the index has not picked up
    pending_refresh: AtomicBool,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl ChatbotEngine {
    pub fn builder() -> ChatbotEngineBuilder {
        ChatbotEngineBuilder::default()
    }

    /// Open a knowledge base from its on-disk configuration.
    ///
    /// `llm_endpoint` is used when the base config does not name one.
    pub fn open(workspace: &Path, base_name: &str, llm_endpoint: Option<&str>) -> AppResult<Self> {
        let config = config::load_config(workspace, base_name)?;

        let objects = Arc::new(FsObjectStore::new(config.storage_root(workspace)));
        let store = Arc::new(DocumentStore::open(&config::get_store_path(workspace, base_name))?);
        let manifest_path = config::get_manifest_path(workspace, base_name);
        let manifest = KnowledgeBaseManifest::load(&manifest_path)?;

        let provider = create_provider(&config.embedding)?;
        let endpoint = config.generation.endpoint.as_deref().or(llm_endpoint);
        let client = create_client(
            &config.generation.provider,
            endpoint,
            Some(config.generation.timeout()),
        )?;

        let faq = match config.faq_path(workspace) {
            Some(path) => FaqCatalog::load(&path)?,
            None => FaqCatalog::empty(),
        };

        tracing::debug!(
            "Opening knowledge base '{}' (storage {:?}, {} FAQ entries)",
            base_name,
            config.storage_root(workspace),
            faq.len()
        );

        Self::builder()
            .config(config)
            .object_store(objects)
            .document_store(store)
            .manifest(manifest, Some(manifest_path))
            .embedding_provider(provider)
            .llm_client(client)
            .faq_catalog(faq)
            .build()
    }

    pub fn config(&self) -> &KnowledgeBaseConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub fn generator(&self) -> &Arc<ResponseGenerator> {
        &self.generator
    }

    /// Answer a support query. Never fails.
    pub async fn ask(&self, request: &ChatRequest) -> ChatResponse {
        self.router.route(request).await
    }

    /// Synchronize from storage, then rebuild the index if anything changed.
    ///
    /// Cycles never overlap. When storage is unreachable the active
    /// generation keeps serving, is marked stale, and the error is returned.
    /// A sync or refresh that fails partway leaves a pending refresh, and a
    /// refresh that left documents out is retried, on the next cycle. A cycle
    /// that changes the document set clears the response cache.
    pub async fn sync_and_refresh(&self) -> AppResult<CycleReport> {
        let _cycle = self.cycle_lock.lock().await;

        let report = match self.synchronizer.sync().await {
            Ok(report) => report,
            Err(e) => {
                if matches!(e, AppError::StorageUnreachable(_)) {
                    self.indexer.mark_stale();
                } else {
                    // Part of the pass may already be in the store.
                    self.pending_refresh.store(true, Ordering::SeqCst);
                }
                return Err(e);
            }
        };
        *self.last_sync.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());

        let pending = self.pending_refresh.load(Ordering::SeqCst);
        let needs_refresh = report.has_changes()
            || pending
            || self.indexer.current().is_none()
            || self.indexer.is_stale()
            || self.indexer.is_degraded();
        if !needs_refresh {
            return Ok(CycleReport {
                sync: report,
                refresh: None,
            });
        }

        let refresh = match self
            .indexer
            .refresh(&report.changed_ids(), &report.removed)
            .await
        {
            Ok(refresh) => refresh,
            Err(e) => {
                self.pending_refresh.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };
        self.pending_refresh.store(false, Ordering::SeqCst);

        if report.has_changes() || pending {
            self.cache.clear_responses();
            tracing::debug!("Response cache cleared after knowledge base change");
        }

        Ok(CycleReport {
            sync: report,
            refresh: Some(refresh),
        })
    }

    /// Build the first generation from the persisted store without touching
    /// object storage.
    pub async fn warm_start(&self) -> AppResult<RefreshReport> {
        let _cycle = self.cycle_lock.lock().await;
        self.indexer.refresh(&[], &[]).await
    }

    /// Run `sync_and_refresh` every `interval` until the handle is shut down.
    /// The first cycle starts immediately.
    pub fn spawn_background_sync(self: &Arc<Self>, interval: Duration) -> BackgroundSync {
        let (shutdown, mut stop) = watch::channel(false);
        let engine = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.sync_and_refresh().await {
                            Ok(cycle) => tracing::debug!(
                                changed = cycle.sync.has_changes(),
                                rebuilt = cycle.refresh.is_some(),
                                "Background sync cycle finished"
                            ),
                            Err(e) => tracing::warn!("Background sync cycle failed: {}", e),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Background sync stopped");
        });

        BackgroundSync { shutdown, handle }
    }

    pub fn status(&self) -> AppResult<EngineStatus> {
        let (active_documents, removed_documents) = self.store.counts()?;

        Ok(EngineStatus {
            base: self.config.name.clone(),
            active_documents,
            removed_documents,
            persisted_embeddings: self.store.embedding_count()?,
            index: self.indexer.status(),
            cache: self.cache.stats(),
            workers: self.pool.size(),
            in_flight: self.pool.in_flight(),
            embedding_calls: self.embedder.provider_calls(),
            generation_calls: self.generator.invocations(),
            last_sync: *self.last_sync.read().unwrap_or_else(|e| e.into_inner()),
        })
    }
}

/// Handle to the periodic sync task.
pub struct BackgroundSync {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundSync {
    /// Stop the task, waiting for an in-progress cycle to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("Background sync task ended abnormally: {}", e);
        }
    }
}

/// Collects the engine's collaborators.
#[derive(Default)]
pub struct ChatbotEngineBuilder {
    config: Option<KnowledgeBaseConfig>,
    objects: Option<Arc<dyn ObjectStore>>,
    store: Option<Arc<DocumentStore>>,
    manifest: Option<(KnowledgeBaseManifest, Option<PathBuf>)>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    client: Option<Arc<dyn LlmClient>>,
    faq: Option<FaqCatalog>,
}

impl ChatbotEngineBuilder {
    pub fn config(mut self, config: KnowledgeBaseConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn document_store(mut self, store: Arc<DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn manifest(mut self, manifest: KnowledgeBaseManifest, path: Option<PathBuf>) -> Self {
        self.manifest = Some((manifest, path));
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn faq_catalog(mut self, faq: FaqCatalog) -> Self {
        self.faq = Some(faq);
        self
    }

    /// Assemble the engine.
    ///
    /// The embedding provider, generation client and object store are
    /// required; the rest default to an in-memory store, an empty manifest
    /// and an empty FAQ catalog.
    pub fn build(self) -> AppResult<ChatbotEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let provider = self
            .provider
            .ok_or_else(|| AppError::Config("No embedding provider configured".to_string()))?;
        let client = self
            .client
            .ok_or_else(|| AppError::Config("No generation client configured".to_string()))?;
        let objects = self
            .objects
            .ok_or_else(|| AppError::Config("No object store configured".to_string()))?;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(DocumentStore::open_in_memory()?),
        };
        let (manifest, manifest_path) = self.manifest.unwrap_or_default();
        let faq = self.faq.unwrap_or_default();

        let pool = WorkerPool::new(config.workers);
        let cache = Arc::new(CacheLayer::from_config(&config.cache));
        let embedder = Arc::new(Embedder::new(
            provider,
            Arc::clone(&cache),
            Arc::clone(&store),
            pool.clone(),
        ));
        let indexer = Arc::new(Indexer::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            config.retrieval.exact_threshold,
            config.retrieval.n_probe,
        ));
        let retriever = Arc::new(Retriever::new(
            Arc::clone(&embedder),
            Arc::clone(&indexer),
            config.retrieval.relevance_floor,
        ));
        let generator = Arc::new(ResponseGenerator::new(
            client,
            pool.clone(),
            &config.generation,
        ));
        let synchronizer = Synchronizer::new(
            objects,
            Arc::clone(&store),
            manifest,
            manifest_path,
            config.storage.prefix.clone(),
            config.storage.sidecar.clone(),
        );
        let router = QueryRouter::new(
            Arc::clone(&cache),
            Arc::new(FaqMatcher::new(faq, config.faq.threshold)),
            Arc::clone(&retriever),
            Arc::clone(&generator),
            Arc::clone(&store),
            config.retrieval.top_k,
        );

        Ok(ChatbotEngine {
            config,
            store,
            cache,
            pool,
            embedder,
            indexer,
            retriever,
            generator,
            synchronizer,
            router,
            cycle_lock: Mutex::new(()),
            pending_refresh: AtomicBool::new(false),
            last_sync: RwLock::new(None),
        })
    }
}
