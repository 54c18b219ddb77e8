//! Pipeline configuration resolved from the environment.
//!
//! Every knob has a compiled default so the pipeline is runnable without any
//! configuration; a `.env` file is loaded opportunistically before the
//! process environment is consulted.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::{RagError, RagResult};

const DEFAULT_FEEDS: &[&str] = &[
    "https://feeds.bbci.co.uk/news/rss.xml",
    "https://rss.cnn.com/rss/edition.rss",
    "https://feeds.reuters.com/reuters/topNews",
];

/// All tunables of the ingestion and query paths.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Syndication feed endpoints polled during ingestion.
    pub feeds: Vec<String>,
    /// Cap on candidate items taken from each feed.
    pub max_items_per_feed: usize,
    /// Timeout applied to every outbound HTTP call.
    pub fetch_timeout: Duration,
    /// Pacing delay between consecutive article scrapes on one feed.
    pub scrape_delay: Duration,

    /// Minimum cleaned text length for a content selector to be accepted.
    pub min_candidate_len: usize,
    /// Minimum viable article length; shorter extractions are rejected.
    pub min_article_len: usize,
    /// Extracted content is truncated to this length.
    pub max_article_len: usize,
    /// Feed summaries are truncated to this length.
    pub max_summary_len: usize,

    /// Chunk window size in words.
    pub chunk_size_words: usize,
    /// Overlap between consecutive chunk windows, in words.
    pub chunk_overlap_words: usize,
    /// Windows with less text than this are dropped.
    pub min_chunk_len: usize,

    /// Embedding API endpoint (OpenAI-compatible `/embeddings` shape).
    pub embedding_endpoint: String,
    /// Embedding model identifier, recorded with the index.
    pub embedding_model: String,
    /// Embedding vector dimension.
    pub embedding_dimensions: usize,
    /// Bearer token for the embedding API, if required.
    pub embedding_api_key: Option<String>,
    /// Concurrent embedding calls during indexing.
    pub embedding_concurrency: usize,

    /// Language model API endpoint.
    pub llm_endpoint: String,
    /// Language model identifier.
    pub llm_model: String,
    /// API key for the language model, if required.
    pub llm_api_key: Option<String>,

    /// Retry budget for provider calls (attempts beyond the first).
    pub max_retries: u32,

    /// Number of hits requested from the index per query.
    pub top_k: usize,
    /// Similarity floor; hits below it are discarded.
    pub min_similarity: f32,
    /// Number of recent conversation turns included in the prompt.
    pub history_window: usize,

    /// Session lifetime.
    pub session_ttl: Duration,
    /// Response cache lifetime, independent of and shorter than the session.
    pub cache_ttl: Duration,

    /// Path of the persisted article corpus.
    pub corpus_path: PathBuf,
    /// Path of the sqlite vector index.
    pub index_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feeds: DEFAULT_FEEDS.iter().map(|s| s.to_string()).collect(),
            max_items_per_feed: 10,
            fetch_timeout: Duration::from_secs(30),
            scrape_delay: Duration::from_secs(1),
            min_candidate_len: 200,
            min_article_len: 100,
            max_article_len: 2000,
            max_summary_len: 500,
            chunk_size_words: 180,
            chunk_overlap_words: 40,
            min_chunk_len: 50,
            embedding_endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 768,
            embedding_api_key: None,
            embedding_concurrency: 4,
            llm_endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            llm_model: "gemini-1.5-flash".to_string(),
            llm_api_key: None,
            max_retries: 3,
            top_k: 5,
            min_similarity: 0.2,
            history_window: 6,
            session_ttl: Duration::from_secs(3600),
            cache_ttl: Duration::from_secs(1800),
            corpus_path: PathBuf::from("data/articles.json"),
            index_path: PathBuf::from("data/chunks.sqlite"),
        }
    }
}

impl PipelineConfig {
    /// Resolves the configuration from environment variables, falling back to
    /// the compiled defaults for anything unset.
    pub fn from_env() -> RagResult<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            feeds: env_list("NEWS_RSS_FEEDS").unwrap_or(defaults.feeds),
            max_items_per_feed: env_parse("MAX_ITEMS_PER_FEED", defaults.max_items_per_feed),
            fetch_timeout: env_secs("FETCH_TIMEOUT_SECS", defaults.fetch_timeout),
            scrape_delay: env_millis("SCRAPE_DELAY_MS", defaults.scrape_delay),
            min_candidate_len: defaults.min_candidate_len,
            min_article_len: defaults.min_article_len,
            max_article_len: defaults.max_article_len,
            max_summary_len: defaults.max_summary_len,
            chunk_size_words: env_parse("CHUNK_SIZE_WORDS", defaults.chunk_size_words),
            chunk_overlap_words: env_parse("CHUNK_OVERLAP_WORDS", defaults.chunk_overlap_words),
            min_chunk_len: defaults.min_chunk_len,
            embedding_endpoint: env_string("EMBEDDING_ENDPOINT", defaults.embedding_endpoint),
            embedding_model: env_string("EMBEDDING_MODEL", defaults.embedding_model),
            embedding_dimensions: env_parse("EMBEDDING_DIMENSIONS", defaults.embedding_dimensions),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY").ok(),
            embedding_concurrency: env_parse(
                "EMBEDDING_CONCURRENCY",
                defaults.embedding_concurrency,
            ),
            llm_endpoint: env_string("LLM_ENDPOINT", defaults.llm_endpoint),
            llm_model: env_string("LLM_MODEL", defaults.llm_model),
            llm_api_key: std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("LLM_API_KEY"))
                .ok(),
            max_retries: env_parse("PROVIDER_MAX_RETRIES", defaults.max_retries),
            top_k: env_parse("TOP_K_RESULTS", defaults.top_k),
            min_similarity: env_parse("MIN_SIMILARITY", defaults.min_similarity),
            history_window: env_parse("HISTORY_WINDOW", defaults.history_window),
            session_ttl: env_secs("SESSION_TTL", defaults.session_ttl),
            cache_ttl: env_secs("CACHE_TTL", defaults.cache_ttl),
            corpus_path: env_path("CORPUS_PATH", defaults.corpus_path),
            index_path: env_path("INDEX_PATH", defaults.index_path),
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects parameter combinations that would misbehave downstream.
    pub fn validate(&self) -> RagResult<()> {
        if self.chunk_size_words == 0 {
            return Err(RagError::Config("chunk size must be positive".into()));
        }
        if self.chunk_overlap_words >= self.chunk_size_words {
            return Err(RagError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap_words, self.chunk_size_words
            )));
        }
        if self.embedding_dimensions == 0 {
            return Err(RagError::Config(
                "embedding dimension must be positive".into(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.min_similarity) {
            return Err(RagError::Config(format!(
                "similarity floor {} outside [-1, 1]",
                self.min_similarity
            )));
        }
        if self.min_article_len > self.max_article_len {
            return Err(RagError::Config(
                "minimum article length exceeds the maximum".into(),
            ));
        }
        Ok(())
    }
}

fn env_path(key: &str, fallback: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(fallback)
}

fn env_string(key: &str, fallback: String) -> String {
    std::env::var(key).unwrap_or(fallback)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}

fn env_secs(key: &str, fallback: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

fn env_millis(key: &str, fallback: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(fallback)
}
