//! Retrieval-augmented question answering over an ingested news corpus.
//!
//! ```text
//! Feed endpoints ──► ingestion::feeds ──► ingestion::extract ──► CorpusStore
//!                                                                    │
//! CorpusStore ──► chunking ──► embeddings ──► stores (vector index) ◄┘
//!
//! Question ──► retrieval::Retriever ──► synthesis::Synthesizer ──► answer
//!                     ▲                        ▲
//!                     │                        │
//!              stores::VectorIndex      session (history + cache)
//! ```
//!
//! Ingestion is a discrete batch step: feeds are fetched, article pages are
//! scraped through a prioritized selector cascade, and the surviving
//! articles are chunked, embedded, and upserted into a vector index. At
//! query time the [`service::ChatService`] embeds the question with the
//! same provider the index was built with, retrieves the ranked context
//! set, and synthesizes a cited answer with a confidence score — or a
//! canned refusal when no grounding clears the similarity floor.

pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod ingestion;
pub mod retrieval;
pub mod service;
pub mod session;
pub mod stores;
pub mod synthesis;
pub mod types;

pub use chunking::{ChunkSpan, Chunker};
pub use config::PipelineConfig;
pub use embeddings::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use ingestion::{
    Article, ArticleExtractor, CorpusIndexer, CorpusStore, FeedFetcher, FeedItem, IndexSummary,
    IngestionPipeline, IngestionSummary,
};
pub use retrieval::Retriever;
pub use service::{ChatResponse, ChatService};
pub use session::{ResponseCache, Role, SessionStore, Turn};
pub use stores::{MemoryVectorIndex, RetrievalHit, SqliteVectorIndex, StoredChunk, VectorIndex};
pub use synthesis::{
    CompletionProvider, HttpCompletionProvider, SourceRef, SynthesisResult, Synthesizer,
};
pub use types::{RagError, RagResult};
