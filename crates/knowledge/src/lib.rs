//! Hybrid support chatbot engine.
//!
//! Documents are mirrored from object storage into a SQLite store, embedded
//! into immutable index generations, and served through a router that tries
//! the response cache, then the FAQ catalog, then retrieval-augmented
//! generation.

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod faq;
pub mod generator;
pub mod index;
pub mod manifest;
pub mod pool;
pub mod retriever;
pub mod router;
pub mod storage;
pub mod store;
pub mod sync;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::KnowledgeBaseConfig;
pub use engine::{BackgroundSync, ChatbotEngine, ChatbotEngineBuilder, CycleReport, EngineStatus};
pub use faq::{FaqCatalog, FaqEntry, FaqMatcher};
pub use types::{
    AnswerSource, ChatRequest, ChatResponse, Document, RefreshReport, RetrievalResult, Role,
    SyncReport, Turn,
};
