//! Shared error taxonomy for the pipeline.
//!
//! Every stage boundary passes failures as values of [`RagError`] so that a
//! failing unit of work (one feed, one article, one chunk) can be logged and
//! skipped without aborting the batch around it. Query-time callers match on
//! the variant to distinguish retrieval problems from generation problems.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type RagResult<T> = Result<T, RagError>;

/// Failure classes of the pipeline.
///
/// Ingestion-time variants (`Feed`, `Extraction`, `Chunking`) are recovered
/// locally: the unit is dropped and the batch continues. Query-time variants
/// (`Embedding`, `Index`, `Generation`) surface to the caller so a gateway
/// can present a user-visible message.
#[derive(Debug, Error)]
pub enum RagError {
    /// A syndication feed could not be fetched or parsed.
    #[error("feed fetch failed: {0}")]
    Feed(String),

    /// An article page could not be fetched, or its extracted content fell
    /// below the minimum viable length.
    #[error("content extraction failed: {0}")]
    Extraction(String),

    /// The embedding provider returned an error after retries were exhausted.
    #[error("embedding provider error: {0}")]
    Embedding(String),

    /// The vector index rejected an operation or was unreachable.
    #[error("vector index error: {0}")]
    Index(String),

    /// The language model returned an error after retries were exhausted.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Persistence of the corpus or index failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The pipeline was assembled from incompatible parts, e.g. an index
    /// built with a different embedding model than the query path uses.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err.to_string())
    }
}
