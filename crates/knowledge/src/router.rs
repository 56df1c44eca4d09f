//! Query router.
//!
//! Each query walks an explicit state machine:
//!
//! ```text
//! CheckCache -> MatchFaq -> RetrieveVector -> Generate -> Respond
//!      |            |             |
//!      +------------+-------------+--------------------> Respond
//! ```
//!
//! Every stage is a separate method returning the next stage, so stages can be
//! exercised on their own. Routing never fails: any error degrades to a
//! fallback answer.

use crate::cache::CacheLayer;
use crate::faq::{normalize, FaqMatcher};
use crate::generator::{ContextExcerpt, ResponseGenerator};
use crate::retriever::Retriever;
use crate::store::DocumentStore;
use crate::types::{AnswerSource, ChatRequest, ChatResponse, RetrievalResult};
use mentor_core::AppError;
use std::sync::Arc;
use tracing::Instrument;

/// Answer returned when retrieval finds nothing usable.
pub const NO_INFORMATION_ANSWER: &str =
    "I'm unable to find relevant information about that in the course material. \
     Please rephrase your question or contact support.";

/// Where a query currently is in the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteStage {
    CheckCache,
    MatchFaq,
    RetrieveVector,
    Generate(RetrievalResult),
    Respond(ChatResponse),
}

impl RouteStage {
    pub fn name(&self) -> &'static str {
        match self {
            RouteStage::CheckCache => "check_cache",
            RouteStage::MatchFaq => "match_faq",
            RouteStage::RetrieveVector => "retrieve_vector",
            RouteStage::Generate(_) => "generate",
            RouteStage::Respond(_) => "respond",
        }
    }
}

pub struct QueryRouter {
    cache: Arc<CacheLayer>,
    faq: Arc<FaqMatcher>,
    retriever: Arc<Retriever>,
    generator: Arc<ResponseGenerator>,
    store: Arc<DocumentStore>,
    top_k: usize,
}

impl QueryRouter {
    pub fn new(
        cache: Arc<CacheLayer>,
        faq: Arc<FaqMatcher>,
        retriever: Arc<Retriever>,
        generator: Arc<ResponseGenerator>,
        store: Arc<DocumentStore>,
        top_k: usize,
    ) -> Self {
        Self {
            cache,
            faq,
            retriever,
            generator,
            store,
            top_k,
        }
    }

    /// Answer one query.
    pub async fn route(&self, request: &ChatRequest) -> ChatResponse {
        let span = tracing::info_span!("chat", session = %request.session_id);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: &ChatRequest) -> ChatResponse {
        let key = normalize(&request.query);
        // Read before retrieval so an answer built on a replaced index is not cached.
        let epoch = self.cache.response_epoch();
        let mut stage = RouteStage::CheckCache;

        loop {
            tracing::trace!(stage = stage.name(), "Routing");
            stage = match stage {
                RouteStage::CheckCache => self.check_cache(&key),
                RouteStage::MatchFaq => self.match_faq(&request.query),
                RouteStage::RetrieveVector => self.retrieve_vector(&request.query).await,
                RouteStage::Generate(retrieval) => {
                    self.generate(request, &key, retrieval, epoch).await
                }
                RouteStage::Respond(response) => {
                    tracing::info!(
                        source = response.source.as_str(),
                        confidence = response.confidence,
                        citations = response.citations.len(),
                        "Answered query"
                    );
                    return response;
                }
            };
        }
    }

    pub fn check_cache(&self, key: &str) -> RouteStage {
        if key.is_empty() {
            return RouteStage::Respond(no_information());
        }

        match self.cache.get_response(key) {
            Some(cached) => RouteStage::Respond(ChatResponse::new(
                cached.answer,
                AnswerSource::Cache,
                cached.confidence,
                Vec::new(),
            )),
            None => RouteStage::MatchFaq,
        }
    }

    pub fn match_faq(&self, query: &str) -> RouteStage {
        match self.faq.find(query) {
            Some(found) => {
                tracing::debug!("FAQ match with ratio {:.3}", found.ratio);
                RouteStage::Respond(ChatResponse::new(
                    found.entry.canonical_answer.clone(),
                    AnswerSource::Faq,
                    found.ratio,
                    Vec::new(),
                ))
            }
            None => RouteStage::RetrieveVector,
        }
    }

    pub async fn retrieve_vector(&self, query: &str) -> RouteStage {
        match self.retriever.retrieve(query, self.top_k).await {
            Ok(result) if !result.is_empty() => RouteStage::Generate(result),
            Ok(_) => {
                tracing::debug!("No document above the relevance floor");
                RouteStage::Respond(no_information())
            }
            Err(AppError::IndexUnavailable(msg)) => {
                tracing::debug!("Vector path skipped: {}", msg);
                RouteStage::Respond(no_information())
            }
            Err(e) => {
                tracing::warn!("Retrieval failed: {}", e);
                RouteStage::Respond(no_information())
            }
        }
    }

    /// Generate from the retrieved documents and cache the answer, unless the
    /// response cache was cleared after `epoch` was read.
    pub async fn generate(
        &self,
        request: &ChatRequest,
        key: &str,
        retrieval: RetrievalResult,
        epoch: u64,
    ) -> RouteStage {
        let excerpts = self.load_excerpts(&retrieval);
        if excerpts.is_empty() {
            return RouteStage::Respond(no_information());
        }

        let answer = self
            .generator
            .generate(&request.query, &excerpts, &request.history)
            .await;

        if !answer.used_context {
            return RouteStage::Respond(ChatResponse::new(
                answer.text,
                AnswerSource::Fallback,
                0.0,
                Vec::new(),
            ));
        }

        let response = ChatResponse::new(
            answer.text,
            AnswerSource::Rag,
            excerpts[0].score,
            answer.cited,
        );
        if !self.cache.put_response_since(epoch, key, response.clone()) {
            tracing::debug!("Knowledge base changed during generation, answer not cached");
        }
        RouteStage::Respond(response)
    }

    /// Resolve hits to document text, skipping ids removed since the
    /// generation was built.
    fn load_excerpts(&self, retrieval: &RetrievalResult) -> Vec<ContextExcerpt> {
        retrieval
            .hits
            .iter()
            .filter_map(|hit| match self.store.get_document(&hit.document_id) {
                Ok(Some(doc)) => Some(ContextExcerpt {
                    document_id: doc.id,
                    text: doc.content,
                    score: hit.score,
                }),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", hit.document_id, e);
                    None
                }
            })
            .collect()
    }
}

fn no_information() -> ChatResponse {
    ChatResponse::new(NO_INFORMATION_ANSWER, AnswerSource::Fallback, 0.0, Vec::new())
}
