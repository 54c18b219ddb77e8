//! Embedding providers.
//!
//! The same provider instance embeds chunks at index time and queries at
//! retrieval time; the pair (model id, dimension) is recorded with the index
//! so an accidental model swap is caught as a configuration error instead of
//! silently degrading retrieval.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{RagError, RagResult};

/// Produces fixed-dimension vectors for arbitrary text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier of the embedding model, recorded with the index.
    fn model_id(&self) -> &str;

    /// Dimension of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Embeds a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;
}

/// Remote embedding provider speaking the common `/embeddings` JSON shape
/// (`{model, input}` in, `data[].embedding` out).
///
/// Transient failures (429, 5xx, network errors) are retried with
/// exponential backoff; other client errors fail immediately.
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        api_key: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> RagResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RagError::Config(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            dimensions,
            api_key,
            max_retries,
        })
    }

    async fn request(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let payload = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&payload);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = response
                            .json()
                            .await
                            .map_err(|err| RagError::Embedding(err.to_string()))?;
                        return self.validate(texts.len(), parsed);
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "embedding call failed, will retry");
                        last_err = Some(RagError::Embedding(format!(
                            "embedding API {status}: {body}"
                        )));
                        continue;
                    }
                    return Err(RagError::Embedding(format!(
                        "embedding API {status}: {body}"
                    )));
                }
                Err(err) => {
                    warn!(error = %err, attempt, "embedding request error, will retry");
                    last_err = Some(RagError::Embedding(err.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| RagError::Embedding("embedding failed after retries".into())))
    }

    fn validate(&self, expected: usize, parsed: EmbeddingResponse) -> RagResult<Vec<Vec<f32>>> {
        if parsed.data.len() != expected {
            return Err(RagError::Embedding(format!(
                "expected {expected} embeddings, provider returned {}",
                parsed.data.len()
            )));
        }
        let mut out = Vec::with_capacity(parsed.data.len());
        for datum in parsed.data {
            if datum.embedding.len() != self.dimensions {
                return Err(RagError::Embedding(format!(
                    "expected dimension {}, provider returned {}",
                    self.dimensions,
                    datum.embedding.len()
                )));
            }
            out.push(datum.embedding);
        }
        Ok(out)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at 32s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// Deterministic in-process embedder for tests and offline development.
///
/// Each word contributes to one hashed component, so texts sharing
/// vocabulary land close together in the vector space while unrelated texts
/// stay near orthogonal. Vectors are L2-normalized.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let token: String = token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let slot = (hasher.finish() % self.dimensions as u64) as usize;
            vector[slot] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn model_id(&self) -> &str {
        "mock-embedder"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::default();
        let inputs = vec![
            "parliament passed the budget".to_string(),
            "storms battered the coast".to_string(),
            "parliament passed the budget".to_string(),
        ];

        let first = provider.embed(&inputs).await.unwrap();
        let second = provider.embed(&inputs).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0], first[2]);
        assert_ne!(first[0], first[1]);
    }

    #[tokio::test]
    async fn mock_embeddings_are_unit_length() {
        let provider = MockEmbeddingProvider::default();
        let vectors = provider
            .embed(&["a handful of words to embed".to_string()])
            .await
            .unwrap();
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn related_texts_score_higher_than_unrelated() {
        let provider = MockEmbeddingProvider::default();
        let vectors = provider
            .embed(&[
                "the election results were announced today".to_string(),
                "election results announced".to_string(),
                "quantum chips ship next spring".to_string(),
            ])
            .await
            .unwrap();

        let related = dot(&vectors[0], &vectors[1]);
        let unrelated = dot(&vectors[0], &vectors[2]);
        assert!(related > unrelated);
    }

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(10), Duration::from_secs(32));
    }
}
