//! # Error types
//!
//! [`RecallError`] is the error type shared by the embedding backends, the
//! vector index and the completion clients. Most variants never reach a query
//! caller: the orchestrator converts them into a normally shaped
//! [`RetrievalResult`](crate::models::RetrievalResult) with an explanatory
//! answer. Only [`RecallError::InvalidQuery`] (bad input) and
//! [`RecallError::DimensionMismatch`] at configure time are surfaced directly.

use thiserror::Error;

/// Errors produced by the retrieval core.
#[derive(Debug, Error)]
pub enum RecallError {
    /// Invalid or unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The query request failed validation.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// An embedding call was made with no input texts.
    #[error("embedding input must contain at least one text")]
    EmptyInput,

    /// A document was created without any text.
    #[error("document text must not be empty")]
    EmptyDocument,

    /// The remote embedding endpoint failed or answered without `embeddings`.
    #[error("remote embedding error: {0}")]
    RemoteEmbedding(String),

    /// Any other embedding backend failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The embedding backend and the stored index disagree on vector size.
    #[error(
        "index dimension mismatch: index holds {expected}-dimensional vectors but the embedding \
         backend produces {actual}; reset the index (`recall reset --confirm`) before switching models"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    /// The index store failed.
    #[error("index store error: {0}")]
    Store(String),

    /// SQLite failure inside the index store.
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// The LLM call failed or returned an unusable answer.
    #[error("generation error: {0}")]
    Generation(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecallError {
    /// Whether this error means the index must be reset before it can be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RecallError::DimensionMismatch { .. })
    }
}
