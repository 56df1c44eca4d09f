//! Knowledge system type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compute the content hash of a document body (hex SHA-256).
///
/// Two documents with equal hashes are treated as identical content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A synchronized knowledge base document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identifier derived from the object key
    pub id: String,

    /// Object key the document was read from
    pub source_path: String,

    /// Document body (UTF-8 text)
    pub content: String,

    /// `content_hash(content)`
    pub content_hash: String,

    /// Course chapter, from the storage sidecar
    #[serde(default)]
    pub chapter: Option<String>,

    /// Topic tags, from the storage sidecar
    #[serde(default)]
    pub tags: Vec<String>,

    /// Incremented on every content change
    pub version: u32,

    /// Soft-deleted: kept for audit, never retrievable
    #[serde(default)]
    pub removed: bool,

    /// Last time the synchronizer wrote this record
    pub updated_at: DateTime<Utc>,
}

/// A document's vector in one index generation.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// Back-reference to the embedded document
    pub document_id: String,

    /// Hash of the content that was embedded
    pub content_hash: String,

    /// Fixed-dimension embedding
    pub vector: Vec<f32>,

    /// `provider:model` that produced the vector
    pub model_version: String,
}

/// One retrieved document with its similarity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredDocument {
    pub document_id: String,
    pub score: f32,
}

/// Nearest-neighbor hits, descending by score, at most `k` long.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredDocument>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Highest similarity, or 0.0 when empty.
    pub fn top_score(&self) -> f32 {
        self.hits.first().map(|h| h.score).unwrap_or(0.0)
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.hits.iter().map(|h| h.document_id.clone()).collect()
    }
}

/// A document that could not be synchronized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncIssue {
    /// Object key
    pub key: String,

    /// Why it was skipped
    pub message: String,
}

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
    pub errors: Vec<SyncIssue>,
}

impl SyncReport {
    /// Whether the document set changed.
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }

    /// Ids whose content must be (re-)embedded.
    pub fn changed_ids(&self) -> Vec<String> {
        self.added.iter().chain(self.updated.iter()).cloned().collect()
    }
}

/// Outcome of one index rebuild.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RefreshReport {
    /// Id of the generation that is now active
    pub generation: u64,

    /// Documents present in the new generation
    pub indexed: usize,

    /// Vectors carried over from the previous generation
    pub reused: usize,

    /// Vectors obtained from the embedding cache or store
    pub cached: usize,

    /// Vectors computed by the embedding model
    pub embedded: usize,

    /// Documents excluded because embedding failed
    pub failed: Vec<String>,
}

/// Who said a prior turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// A support query from the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub query: String,

    /// Already-authenticated session identifier
    pub session_id: String,

    #[serde(default)]
    pub history: Vec<Turn>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }
}

/// Which stage produced an answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Cache,
    Faq,
    Fallback,
    Rag,
}

impl AnswerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Faq => "faq",
            Self::Fallback => "fallback",
            Self::Rag => "rag",
        }
    }
}

/// The answer returned to the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub answer: String,
    pub source: AnswerSource,

    /// In [0, 1]
    pub confidence: f32,

    /// Document ids used as context (empty unless `source` is `rag`)
    pub citations: Vec<String>,
}

impl ChatResponse {
    pub fn new(
        answer: impl Into<String>,
        source: AnswerSource,
        confidence: f32,
        citations: Vec<String>,
    ) -> Self {
        Self {
            answer: answer.into(),
            source,
            confidence: confidence.clamp(0.0, 1.0),
            citations,
        }
    }
}

/// Output of the response generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub text: String,

    /// False when the model failed and a fallback text was substituted
    pub used_context: bool,

    /// Ids of the excerpts that fit in the prompt, in retrieval order
    pub cited: Vec<String>,
}
