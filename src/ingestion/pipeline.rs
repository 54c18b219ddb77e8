//! Batch orchestration: feeds → extraction → corpus, and corpus → index.
//!
//! Each stage consumes a finite sequence and produces the next stage's
//! input; there is no shared mutable state beyond the storage handles the
//! stages write to. Failures are isolated per unit of work so a bad feed,
//! page, or chunk never aborts the batch — a partial corpus beats none.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::chunking::{ChunkSpan, Chunker};
use crate::config::PipelineConfig;
use crate::embeddings::EmbeddingProvider;
use crate::stores::{StoredChunk, VectorIndex};
use crate::types::{RagError, RagResult};

use super::corpus::{Article, CorpusStore, source_from_url};
use super::extract::{ArticleExtractor, truncate_chars};
use super::feeds::{FeedFetcher, FeedItem};

const USER_AGENT: &str = "newsrag-ingestor/0.1 (+https://github.com/newsrag/newsrag)";

/// What an ingestion run produced, for the operator trigger to report.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionSummary {
    pub article_count: usize,
    pub average_word_count: f64,
    pub sources: Vec<String>,
}

impl IngestionSummary {
    fn from_articles(articles: &[Article]) -> Self {
        let article_count = articles.len();
        let average_word_count = if article_count == 0 {
            0.0
        } else {
            articles.iter().map(|a| a.word_count).sum::<usize>() as f64 / article_count as f64
        };
        let mut sources: Vec<String> = articles
            .iter()
            .map(|a| a.source.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        sources.sort();
        Self {
            article_count,
            average_word_count,
            sources,
        }
    }
}

/// Fetches feeds, extracts article content, and rewrites the corpus.
pub struct IngestionPipeline {
    fetcher: FeedFetcher,
    extractor: ArticleExtractor,
    corpus: CorpusStore,
    feeds: Vec<String>,
    scrape_delay: Duration,
    max_summary_len: usize,
}

impl IngestionPipeline {
    pub fn new(config: &PipelineConfig) -> RagResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|err| RagError::Config(err.to_string()))?;

        Ok(Self {
            fetcher: FeedFetcher::new(client.clone(), config.max_items_per_feed),
            extractor: ArticleExtractor::new(
                client,
                config.min_candidate_len,
                config.min_article_len,
                config.max_article_len,
            ),
            corpus: CorpusStore::new(config.corpus_path.clone()),
            feeds: config.feeds.clone(),
            scrape_delay: config.scrape_delay,
            max_summary_len: config.max_summary_len,
        })
    }

    /// Runs the full fetch → extract → persist batch and reports a summary.
    ///
    /// Feeds are processed concurrently; article scrapes within one feed
    /// are sequential with a pacing delay, which keeps per-host request
    /// pacing intact since a feed's articles share its host.
    pub async fn run(&self) -> RagResult<IngestionSummary> {
        info!(feeds = self.feeds.len(), "starting news ingestion");
        let feeds = self.fetcher.fetch_all(&self.feeds).await;

        let seen_urls = Mutex::new(HashSet::new());
        let per_feed = join_all(
            feeds
                .into_iter()
                .map(|(feed_url, items)| self.process_feed(feed_url, items, &seen_urls)),
        )
        .await;

        let articles: Vec<Article> = per_feed.into_iter().flatten().collect();
        self.corpus.save(&articles).await?;

        let summary = IngestionSummary::from_articles(&articles);
        info!(
            articles = summary.article_count,
            sources = summary.sources.len(),
            "ingestion complete"
        );
        Ok(summary)
    }

    async fn process_feed(
        &self,
        feed_url: String,
        items: Vec<FeedItem>,
        seen_urls: &Mutex<HashSet<String>>,
    ) -> Vec<Article> {
        let mut articles = Vec::new();
        let mut first = true;
        for item in items {
            if !seen_urls.lock().insert(item.link.clone()) {
                debug!(url = %item.link, "duplicate article url, skipping");
                continue;
            }
            if !first {
                tokio::time::sleep(self.scrape_delay).await;
            }
            first = false;
            if let Some(article) = self.process_item(item).await {
                articles.push(article);
            }
        }
        debug!(feed = %feed_url, kept = articles.len(), "feed processed");
        articles
    }

    async fn process_item(&self, item: FeedItem) -> Option<Article> {
        let Some(content) = self.extractor.scrape(&item.link).await else {
            info!(title = %item.title, "skipping article with insufficient content");
            return None;
        };

        let word_count = content.split_whitespace().count();
        Some(Article {
            id: Article::generate_id(),
            source: source_from_url(&item.link),
            summary: truncate_chars(&item.summary, self.max_summary_len),
            published_date: item.published.unwrap_or_else(Utc::now),
            title: item.title,
            url: item.link,
            word_count,
            content,
            ingestion_date: Utc::now(),
        })
    }
}

/// What an indexing run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSummary {
    pub articles_indexed: usize,
    pub articles_failed: usize,
    pub chunks_written: usize,
    pub chunks_dropped: usize,
}

/// Chunks and embeds a corpus into a vector index.
///
/// Re-running over an article replaces only that article's chunks, so a
/// re-ingestion updates changed articles without a full rebuild.
pub struct CorpusIndexer {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chunker: Chunker,
    concurrency: usize,
}

impl CorpusIndexer {
    /// Builds an indexer; the provider and index must agree on the
    /// embedding model and dimension.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        chunker: Chunker,
        concurrency: usize,
    ) -> RagResult<Self> {
        if provider.model_id() != index.model_id() {
            return Err(RagError::Config(format!(
                "index built with embedding model '{}', provider is '{}'",
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
            chunker,
            concurrency: concurrency.max(1),
        })
    }

    /// Indexes every article, continuing past per-chunk and per-article
    /// failures.
    pub async fn index_articles(&self, articles: &[Article]) -> RagResult<IndexSummary> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut summary = IndexSummary::default();

        for article in articles {
            let spans = self.chunker.chunk(&article.content);
            if spans.is_empty() {
                debug!(article = %article.id, "article produced no chunks");
                continue;
            }
            let span_count = spans.len();

            let embedded = join_all(spans.into_iter().map(|span| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.ok()?;
                    match self.provider.embed(&[span.text.clone()]).await {
                        Ok(mut vectors) if !vectors.is_empty() => {
                            Some((span, vectors.swap_remove(0)))
                        }
                        Ok(_) => None,
                        Err(err) => {
                            warn!(
                                article = %article.id,
                                chunk = span.index,
                                error = %err,
                                "embedding failed, dropping chunk"
                            );
                            None
                        }
                    }
                }
            }))
            .await;

            let stored: Vec<StoredChunk> = embedded
                .into_iter()
                .flatten()
                .map(|(span, vector)| self.to_stored_chunk(article, span, vector))
                .collect();
            summary.chunks_dropped += span_count - stored.len();

            let written = stored.len();
            let replaced = async {
                self.index.remove_article(&article.id).await?;
                self.index.upsert(stored).await
            }
            .await;

            match replaced {
                Ok(()) => {
                    summary.articles_indexed += 1;
                    summary.chunks_written += written;
                }
                Err(err) => {
                    error!(
                        article = %article.id,
                        error = %err,
                        "indexing failed, continuing with remaining articles"
                    );
                    summary.articles_failed += 1;
                }
            }
        }

        info!(
            articles = summary.articles_indexed,
            chunks = summary.chunks_written,
            dropped = summary.chunks_dropped,
            "indexing complete"
        );
        Ok(summary)
    }

    fn to_stored_chunk(&self, article: &Article, span: ChunkSpan, vector: Vec<f32>) -> StoredChunk {
        StoredChunk {
            chunk_id: format!("{}:{}", article.id, span.index),
            article_id: article.id.clone(),
            title: article.title.clone(),
            url: article.url.clone(),
            source: article.source.clone(),
            published_date: article.published_date,
            chunk_index: span.index,
            offset: span.offset,
            length: span.length,
            text: span.text,
            embedding: Some(vector),
        }
    }
}
