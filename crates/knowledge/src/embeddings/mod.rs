//! Embedding generation.
//!
//! `EmbeddingProvider` is the model boundary. `Embedder` wraps a provider
//! with memoization (in-memory cache, then the persisted embedding table)
//! and runs every model call through the shared worker pool.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};

use crate::cache::CacheLayer;
use crate::pool::WorkerPool;
use crate::store::DocumentStore;
use mentor_core::{AppError, AppResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Where an embedding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingOrigin {
    /// In-memory cache hit
    Cache,
    /// Persisted embedding table
    Store,
    /// Computed by the model
    Model,
}

/// Memoizing front of the embedding model.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<CacheLayer>,
    store: Arc<DocumentStore>,
    pool: WorkerPool,
    model_version: String,
    provider_calls: AtomicU64,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<CacheLayer>,
        store: Arc<DocumentStore>,
        pool: WorkerPool,
    ) -> Self {
        let model_version = provider.model_version();
        Self {
            provider,
            cache,
            store,
            pool,
            model_version,
            provider_calls: AtomicU64::new(0),
        }
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Number of times the model itself was invoked.
    pub fn provider_calls(&self) -> u64 {
        self.provider_calls.load(Ordering::Relaxed)
    }

    /// Embed document content, memoized by `content_hash`.
    ///
    /// Unchanged content is never sent to the model twice, across restarts
    /// included, as long as the model version stays the same.
    pub async fn embed_content(
        &self,
        content_hash: &str,
        text: &str,
    ) -> AppResult<(Vec<f32>, EmbeddingOrigin)> {
        if let Some(vector) = self.cache.get_embedding(content_hash, &self.model_version) {
            return Ok((vector, EmbeddingOrigin::Cache));
        }

        if let Some(vector) = self.store.load_embedding(content_hash, &self.model_version)? {
            if vector.len() == self.dimensions() {
                self.cache
                    .put_embedding(content_hash, &self.model_version, vector.clone());
                return Ok((vector, EmbeddingOrigin::Store));
            }
            tracing::warn!(
                "Ignoring persisted embedding for {} with {} dimensions",
                content_hash,
                vector.len()
            );
        }

        let vector = self.call_model(text).await?;

        if let Err(e) = self
            .store
            .save_embedding(content_hash, &self.model_version, &vector)
        {
            tracing::warn!("Failed to persist embedding for {}: {}", content_hash, e);
        }
        self.cache
            .put_embedding(content_hash, &self.model_version, vector.clone());

        Ok((vector, EmbeddingOrigin::Model))
    }

    /// Embed a user query. Queries are not memoized by hash.
    pub async fn embed_query(&self, text: &str) -> AppResult<Vec<f32>> {
        self.call_model(text).await
    }

    async fn call_model(&self, text: &str) -> AppResult<Vec<f32>> {
        let provider = Arc::clone(&self.provider);
        let text = text.to_string();
        self.provider_calls.fetch_add(1, Ordering::Relaxed);

        let vector = self
            .pool
            .run(async move { provider.embed(&text).await })
            .await
            .map_err(|e| match e {
                AppError::Embedding(msg) => AppError::Embedding(msg),
                other => AppError::Embedding(other.to_string()),
            })?;

        if vector.len() != self.dimensions() {
            return Err(AppError::Embedding(format!(
                "model returned {} dimensions, expected {}",
                vector.len(),
                self.dimensions()
            )));
        }

        Ok(vector)
    }
}
