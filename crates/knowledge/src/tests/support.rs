//! Shared fixtures: fake models and a ready-to-sync engine.

use crate::embeddings::providers::TrigramProvider;
use crate::embeddings::EmbeddingProvider;
use crate::engine::ChatbotEngine;
use crate::faq::{FaqCatalog, FaqEntry};
use crate::storage::MemoryObjectStore;
use crate::store::DocumentStore;
use crate::types::ChatRequest;
use crate::KnowledgeBaseConfig;
use async_trait::async_trait;
use mentor_core::{AppError, AppResult};
use mentor_llm::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const EXAM_DOC: &str = "Final exams are scheduled during the last week of each term. \
    The exam timetable is published on the course page two weeks before exams start.";
pub const REFUND_DOC: &str = "Refund requests are processed within fourteen days of purchase. \
    Contact billing to request a refund.";
pub const EXAM_ANSWER: &str = "Exams take place in the last week of term.";

/// Generation client that replies with a fixed text, or fails when `reply` is None.
pub struct ScriptedLlm {
    reply: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn answering(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());

        match &self.reply {
            Some(text) => Ok(LlmResponse {
                content: text.clone(),
                model: request.model.clone(),
                usage: LlmUsage::new(100, 12),
                done: true,
            }),
            None => Err(AppError::Llm("connection refused".to_string())),
        }
    }
}

/// Trigram embeddings behind a switch that makes every call fail.
#[derive(Debug)]
pub struct SwitchableEmbeddings {
    inner: TrigramProvider,
    offline: AtomicBool,
}

impl SwitchableEmbeddings {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: TrigramProvider::new(384),
            offline: AtomicBool::new(false),
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for SwitchableEmbeddings {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Embedding("embedding service unavailable".to_string()));
        }
        self.inner.embed_batch(texts).await
    }
}

pub struct Harness {
    pub objects: Arc<MemoryObjectStore>,
    pub llm: Arc<ScriptedLlm>,
    pub engine: ChatbotEngine,
}

pub fn password_faq() -> Vec<FaqEntry> {
    vec![FaqEntry {
        trigger_phrases: vec!["how do i reset my password".to_string()],
        canonical_answer: "Use the Forgot Password link.".to_string(),
        priority: 0,
    }]
}

pub fn harness_with(
    faq: Vec<FaqEntry>,
    llm: Arc<ScriptedLlm>,
    store: Arc<DocumentStore>,
    config: KnowledgeBaseConfig,
) -> Harness {
    harness_with_provider(faq, llm, store, config, Arc::new(TrigramProvider::new(384)))
}

pub fn harness_with_provider(
    faq: Vec<FaqEntry>,
    llm: Arc<ScriptedLlm>,
    store: Arc<DocumentStore>,
    config: KnowledgeBaseConfig,
    provider: Arc<dyn EmbeddingProvider>,
) -> Harness {
    let objects = Arc::new(MemoryObjectStore::new());
    let engine = ChatbotEngine::builder()
        .config(config)
        .object_store(objects.clone())
        .document_store(store)
        .embedding_provider(provider)
        .llm_client(llm.clone())
        .faq_catalog(FaqCatalog::from_entries(faq).unwrap())
        .build()
        .unwrap();

    Harness {
        objects,
        llm,
        engine,
    }
}

pub fn harness() -> Harness {
    harness_with(
        password_faq(),
        ScriptedLlm::answering(EXAM_ANSWER),
        Arc::new(DocumentStore::open_in_memory().unwrap()),
        KnowledgeBaseConfig::default(),
    )
}

pub fn request(query: &str) -> ChatRequest {
    ChatRequest::new(query, "session-1")
}
