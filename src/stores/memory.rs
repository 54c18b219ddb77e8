//! Brute-force in-memory vector index.
//!
//! Scans every stored vector with cosine similarity on each search. Plenty
//! for test corpora and small deployments; the sqlite backend is the
//! durable option.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{RagError, RagResult};

use super::{RetrievalHit, StoredChunk, VectorIndex, cosine_similarity};

pub struct MemoryVectorIndex {
    model_id: String,
    dimensions: usize,
    chunks: RwLock<HashMap<String, StoredChunk>>,
}

impl MemoryVectorIndex {
    pub fn new(model_id: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimensions,
            chunks: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, chunks: Vec<StoredChunk>) -> RagResult<()> {
        let mut store = self.chunks.write();
        for chunk in chunks {
            let Some(embedding) = chunk.embedding.as_ref() else {
                continue;
            };
            if embedding.len() != self.dimensions {
                return Err(RagError::Config(format!(
                    "chunk {} has dimension {}, index expects {}",
                    chunk.chunk_id,
                    embedding.len(),
                    self.dimensions
                )));
            }
            store.insert(chunk.chunk_id.clone(), chunk);
        }
        Ok(())
    }

    async fn remove_article(&self, article_id: &str) -> RagResult<usize> {
        let mut store = self.chunks.write();
        let before = store.len();
        store.retain(|_, chunk| chunk.article_id != article_id);
        Ok(before - store.len())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> RagResult<Vec<RetrievalHit>> {
        if query.len() != self.dimensions {
            return Err(RagError::Config(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dimensions
            )));
        }

        let store = self.chunks.read();
        let mut hits: Vec<RetrievalHit> = store
            .values()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                let similarity = cosine_similarity(query, embedding);
                if similarity < min_similarity {
                    return None;
                }
                let mut chunk = chunk.clone();
                chunk.embedding = None;
                Some(RetrievalHit { chunk, similarity })
            })
            .collect();

        // Descending similarity, ties broken by ascending chunk id.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self) -> RagResult<usize> {
        Ok(self.chunks.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(id: &str, article: &str, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            chunk_id: id.to_string(),
            article_id: article.to_string(),
            title: "Title".to_string(),
            url: format!("https://example.com/{article}"),
            source: "example.com".to_string(),
            published_date: Utc::now(),
            chunk_index: 0,
            offset: 0,
            length: 10,
            text: "chunk text".to_string(),
            embedding: Some(embedding),
        }
    }

    fn index() -> MemoryVectorIndex {
        MemoryVectorIndex::new("mock-embedder", 2)
    }

    #[tokio::test]
    async fn search_orders_by_descending_similarity() {
        let idx = index();
        idx.upsert(vec![
            chunk("a:0", "a", vec![1.0, 0.0]),
            chunk("b:0", "b", vec![0.8, 0.6]),
            chunk("c:0", "c", vec![0.0, 1.0]),
        ])
        .await
        .unwrap();

        let hits = idx.search(&[1.0, 0.0], 10, -1.0).await.unwrap();
        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert_eq!(hits[0].chunk.chunk_id, "a:0");
    }

    #[tokio::test]
    async fn search_applies_similarity_floor_and_top_k() {
        let idx = index();
        idx.upsert(vec![
            chunk("a:0", "a", vec![1.0, 0.0]),
            chunk("b:0", "b", vec![0.9, 0.1]),
            chunk("c:0", "c", vec![-1.0, 0.0]),
        ])
        .await
        .unwrap();

        let hits = idx.search(&[1.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.similarity >= 0.5));

        let hits = idx.search(&[1.0, 0.0], 1, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn equal_scores_tie_break_by_chunk_id() {
        let idx = index();
        idx.upsert(vec![
            chunk("b:0", "b", vec![1.0, 0.0]),
            chunk("a:0", "a", vec![1.0, 0.0]),
            chunk("c:0", "c", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();

        let hits = idx.search(&[1.0, 0.0], 10, 0.0).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a:0", "b:0", "c:0"]);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_chunk_ids() {
        let idx = index();
        idx.upsert(vec![chunk("a:0", "a", vec![1.0, 0.0])])
            .await
            .unwrap();
        idx.upsert(vec![chunk("a:0", "a", vec![0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(idx.count().await.unwrap(), 1);
        let hits = idx.search(&[0.0, 1.0], 1, 0.9).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn remove_article_deletes_only_its_chunks() {
        let idx = index();
        idx.upsert(vec![
            chunk("a:0", "a", vec![1.0, 0.0]),
            chunk("a:1", "a", vec![0.9, 0.1]),
            chunk("b:0", "b", vec![0.0, 1.0]),
        ])
        .await
        .unwrap();

        assert_eq!(idx.remove_article("a").await.unwrap(), 2);
        assert_eq!(idx.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn chunks_without_embeddings_are_skipped() {
        let idx = index();
        let mut orphan = chunk("a:0", "a", vec![]);
        orphan.embedding = None;
        idx.upsert(vec![orphan]).await.unwrap();
        assert_eq!(idx.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_config_error() {
        let idx = index();
        let result = idx.search(&[1.0, 0.0, 0.0], 5, 0.0).await;
        assert!(matches!(result, Err(RagError::Config(_))));
    }
}
