//! Vector index backends.
//!
//! A [`VectorIndex`] stores embedded chunks and answers nearest-neighbor
//! queries with a similarity floor. Two backends are provided:
//!
//! - [`sqlite::SqliteVectorIndex`] — durable index on sqlite-vec.
//! - [`memory::MemoryVectorIndex`] — brute-force in-memory index for tests
//!   and setups without a database file.
//!
//! Every index is bound to the embedding model that produced its vectors;
//! mixing models is rejected as a configuration error rather than producing
//! garbage similarities at query time.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RagResult;

pub use memory::MemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

/// A chunk together with the article metadata needed for attribution.
///
/// The embedding is optional so search results can omit the vector; chunks
/// submitted for upsert without one are skipped.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredChunk {
    /// Unique chunk id, `"{article_id}:{chunk_index}"`.
    pub chunk_id: String,
    /// Owning article (non-owning back-reference).
    pub article_id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_date: DateTime<Utc>,
    /// Zero-based position of this chunk within the article.
    pub chunk_index: usize,
    /// Byte offset of the chunk in the article content.
    pub offset: usize,
    /// Byte length of the chunk.
    pub length: usize,
    /// The chunk text.
    pub text: String,
    /// The embedding vector, when attached.
    pub embedding: Option<Vec<f32>>,
}

/// One search result: a chunk and its similarity to the query.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetrievalHit {
    pub chunk: StoredChunk,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f32,
}

/// Async interface shared by all index backends.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Identifier of the embedding model this index was built with.
    fn model_id(&self) -> &str;

    /// Dimension of the stored vectors.
    fn dimensions(&self) -> usize;

    /// Inserts chunks, replacing any existing entry with the same chunk id.
    /// Chunks without an embedding are skipped.
    async fn upsert(&self, chunks: Vec<StoredChunk>) -> RagResult<()>;

    /// Removes every chunk belonging to `article_id`, returning how many
    /// were deleted. Used for incremental re-indexing.
    async fn remove_article(&self, article_id: &str) -> RagResult<usize>;

    /// Returns up to `top_k` hits with similarity ≥ `min_similarity`,
    /// ordered by descending similarity; equal scores are ordered by
    /// ascending chunk id. Result chunks carry no embedding.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> RagResult<Vec<RetrievalHit>>;

    /// Number of chunks in the index.
    async fn count(&self) -> RagResult<usize>;
}

/// Cosine similarity between two vectors, `0.0` for mismatched or empty
/// inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
