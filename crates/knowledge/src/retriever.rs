//! Vector retrieval: embed the query, search the active generation, apply
//! the relevance floor.

use crate::embeddings::Embedder;
use crate::index::Indexer;
use crate::types::RetrievalResult;
use mentor_core::{AppError, AppResult};
use std::sync::Arc;

pub struct Retriever {
    embedder: Arc<Embedder>,
    indexer: Arc<Indexer>,
    relevance_floor: f32,
}

impl Retriever {
    pub fn new(embedder: Arc<Embedder>, indexer: Arc<Indexer>, relevance_floor: f32) -> Self {
        Self {
            embedder,
            indexer,
            relevance_floor,
        }
    }

    pub fn relevance_floor(&self) -> f32 {
        self.relevance_floor
    }

    /// Up to `k` documents scoring at least the relevance floor, best first.
    ///
    /// An empty result means nothing relevant was found. Errors mean the
    /// lookup itself failed (no generation yet, embedding failure).
    pub async fn retrieve(&self, query: &str, k: usize) -> AppResult<RetrievalResult> {
        if self.indexer.current().is_none() {
            return Err(AppError::IndexUnavailable(
                "no index generation built yet".to_string(),
            ));
        }

        let query_vector = self.embedder.embed_query(query).await?;
        let mut result = self.indexer.search(&query_vector, k)?;

        let before = result.len();
        result.hits.retain(|hit| hit.score >= self.relevance_floor);
        result.hits.truncate(k);

        tracing::debug!(
            "Retrieved {} of {} candidates above {:.2} (top score {:.3})",
            result.len(),
            before,
            self.relevance_floor,
            result.top_score()
        );

        Ok(result)
    }
}
