//! Query-time retrieval: embed the question, search the index, apply the
//! similarity floor.
//!
//! The retriever refuses to pair an embedding provider with an index built
//! by a different model — an embedding-space mismatch is a configuration
//! error caught at construction, not a runtime surprise of nonsense scores.

use std::sync::Arc;

use tracing::debug;

use crate::embeddings::EmbeddingProvider;
use crate::stores::{RetrievalHit, VectorIndex};
use crate::types::{RagError, RagResult};

pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
    min_similarity: f32,
}

impl Retriever {
    /// Builds a retriever over a provider/index pair that share an
    /// embedding space.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        top_k: usize,
        min_similarity: f32,
    ) -> RagResult<Self> {
        if provider.model_id() != index.model_id() {
            return Err(RagError::Config(format!(
                "index built with embedding model '{}', query provider is '{}'",
                index.model_id(),
                provider.model_id()
            )));
        }
        if provider.dimensions() != index.dimensions() {
            return Err(RagError::Config(format!(
                "index dimension {} does not match provider dimension {}",
                index.dimensions(),
                provider.dimensions()
            )));
        }
        Ok(Self {
            provider,
            index,
            top_k,
            min_similarity,
        })
    }

    /// Returns the ranked context set for `query`.
    ///
    /// An empty result means no grounding is available — a normal outcome
    /// for questions the corpus does not cover, not an error.
    pub async fn retrieve(&self, query: &str) -> RagResult<Vec<RetrievalHit>> {
        let mut vectors = self.provider.embed(&[query.to_string()]).await?;
        if vectors.is_empty() {
            return Err(RagError::Embedding("empty embedding response".into()));
        }
        let query_vector = vectors.swap_remove(0);

        let hits = self
            .index
            .search(&query_vector, self.top_k, self.min_similarity)
            .await?;
        debug!(
            query_len = query.len(),
            hits = hits.len(),
            floor = self.min_similarity,
            "retrieval complete"
        );
        Ok(hits)
    }
}
