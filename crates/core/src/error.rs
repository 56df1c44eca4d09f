//! Error types for the Mentor support chatbot.
//!
//! A single error enum covers configuration, storage, synchronization,
//! embedding, indexing and generation failures. Most of the engine absorbs
//! these locally (skip a document, fall back to a canned answer); only
//! configuration errors are expected to reach `main`.

use thiserror::Error;

/// Unified error type for the Mentor workspace.
///
/// All fallible functions return `Result<T, AppError>`.
/// We never panic: errors must be represented and propagated.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LLM provider errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Knowledge base store errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// A single object in storage could not be read or decoded
    #[error("Storage error: {0}")]
    Storage(String),

    /// Object storage could not be listed at all
    #[error("Object storage unreachable: {0}")]
    StorageUnreachable(String),

    /// A document was skipped during synchronization
    #[error("Sync error: {0}")]
    Sync(String),

    /// The embedding model failed for one input
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// No index generation has been built yet
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// The generative model did not answer in time
    #[error("Generation timed out after {0} ms")]
    GenerationTimeout(u64),

    /// The generative model returned an error
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether the error is scoped to one document or one model call.
    ///
    /// Local failures are logged and absorbed by the engine; everything else
    /// is surfaced to the caller of the operation.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            AppError::Storage(_)
                | AppError::Sync(_)
                | AppError::Embedding(_)
                | AppError::GenerationTimeout(_)
                | AppError::Generation(_)
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
