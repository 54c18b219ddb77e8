//! HTTP-boundary tests: feed fetching, article scraping, the full
//! ingestion batch, and the retry behavior of the remote providers, all
//! against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use newsrag::config::PipelineConfig;
use newsrag::embeddings::{EmbeddingProvider, HttpEmbeddingProvider};
use newsrag::ingestion::{ArticleExtractor, FeedFetcher, IngestionPipeline};
use newsrag::synthesis::{CompletionProvider, HttpCompletionProvider};
use newsrag::types::RagError;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn article_page(paragraph: &str) -> String {
    format!(
        "<html><body><nav>home | world</nav>\
         <article><p>{paragraph}</p></article>\
         <footer>contact us</footer></body></html>"
    )
}

fn long_paragraph() -> String {
    "The parliament approved the national budget late on Tuesday after weeks of debate \
     over health spending and defence allocations, with the finance minister defending \
     the timetable against opposition criticism. Analysts expect the measures to take \
     effect within weeks once the remaining procedural steps are complete, and several \
     departments have already published revised spending plans for the coming year."
        .to_string()
}

fn rss_feed(links: &[&str]) -> String {
    let items: String = links
        .iter()
        .enumerate()
        .map(|(i, link)| {
            format!(
                "<item><title>Story {i}</title><link>{link}</link>\
                 <pubDate>Mon, 03 Aug 2026 10:00:00 GMT</pubDate>\
                 <description>Short teaser {i}</description></item>"
            )
        })
        .collect();
    format!("<?xml version=\"1.0\"?><rss version=\"2.0\"><channel>{items}</channel></rss>")
}

#[tokio::test]
async fn feed_fetcher_parses_items_and_isolates_failures() {
    init_tracing();
    let server = MockServer::start_async().await;
    let good_article = server.url("/articles/one");
    server
        .mock_async(|when, then| {
            when.method(GET).path("/feed.xml");
            then.status(200).body(rss_feed(&[&good_article]));
        })
        .await;

    let fetcher = FeedFetcher::new(reqwest::Client::new(), 10);
    let feeds = vec![server.url("/feed.xml"), server.url("/missing.xml")];
    let results = fetcher.fetch_all(&feeds).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].1.len(), 1);
    assert_eq!(results[0].1[0].link, good_article);
    // The 404 feed contributes an empty list instead of failing the batch.
    assert!(results[1].1.is_empty());
}

#[tokio::test]
async fn extractor_scrapes_article_content() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/articles/one");
            then.status(200).body(article_page(&long_paragraph()));
        })
        .await;

    let extractor = ArticleExtractor::new(reqwest::Client::new(), 100, 100, 2000);
    let content = extractor.scrape(&server.url("/articles/one")).await.unwrap();

    assert!(content.contains("parliament approved the national budget"));
    assert!(!content.contains("home | world"));
}

#[tokio::test]
async fn extractor_returns_none_on_http_errors() {
    let server = MockServer::start_async().await;
    let extractor = ArticleExtractor::new(reqwest::Client::new(), 200, 100, 2000);
    assert!(extractor.scrape(&server.url("/gone")).await.is_none());
}

fn pipeline_config(server: &MockServer, corpus_path: std::path::PathBuf) -> PipelineConfig {
    PipelineConfig {
        feeds: vec![server.url("/feed.xml"), server.url("/broken.xml")],
        scrape_delay: Duration::ZERO,
        fetch_timeout: Duration::from_secs(5),
        corpus_path,
        ..Default::default()
    }
}

async fn mount_corpus(server: &MockServer) {
    let one = server.url("/articles/one");
    let two = server.url("/articles/two");
    server
        .mock_async(move |when, then| {
            when.method(GET).path("/feed.xml");
            // The first link appears twice; the stub article is too short
            // to survive extraction.
            then.status(200).body(rss_feed(&[&one, &one, &two]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/articles/one");
            then.status(200).body(article_page(&long_paragraph()));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/articles/two");
            then.status(200).body(article_page("Too short to keep."));
        })
        .await;
}

#[tokio::test]
async fn ingestion_keeps_viable_articles_and_skips_the_rest() {
    let server = MockServer::start_async().await;
    mount_corpus(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = pipeline_config(&server, dir.path().join("articles.json"));
    let pipeline = IngestionPipeline::new(&config).unwrap();

    let summary = pipeline.run().await.unwrap();

    // One viable article: the duplicate link and the short stub are gone,
    // and the unreachable second feed contributed nothing.
    assert_eq!(summary.article_count, 1);
    assert_eq!(summary.sources.len(), 1);
    assert!(summary.average_word_count > 10.0);

    let corpus = newsrag::CorpusStore::new(config.corpus_path.clone());
    let articles = corpus.load().await.unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].title, "Story 0");
    assert!(articles[0].content.len() >= 100);
    assert_eq!(articles[0].summary, "Short teaser 0");
}

#[tokio::test]
async fn reingestion_is_idempotent_modulo_identity() {
    let server = MockServer::start_async().await;
    mount_corpus(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = pipeline_config(&server, dir.path().join("articles.json"));
    let pipeline = IngestionPipeline::new(&config).unwrap();

    pipeline.run().await.unwrap();
    let corpus = newsrag::CorpusStore::new(config.corpus_path.clone());
    let first = corpus.load().await.unwrap();

    pipeline.run().await.unwrap();
    let second = corpus.load().await.unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_ne!(a.id, b.id);
        assert_eq!(a.title, b.title);
        assert_eq!(a.content, b.content);
        assert_eq!(a.url, b.url);
        assert_eq!(a.source, b.source);
        assert_eq!(a.summary, b.summary);
        assert_eq!(a.word_count, b.word_count);
    }
}

#[tokio::test]
async fn embedding_provider_round_trips_vectors() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(json!({
                "data": [
                    {"embedding": [0.1, 0.2, 0.3]},
                    {"embedding": [0.4, 0.5, 0.6]},
                ]
            }));
        })
        .await;

    let provider = HttpEmbeddingProvider::new(
        server.url("/v1/embeddings"),
        "test-model",
        3,
        Some("secret".to_string()),
        Duration::from_secs(5),
        0,
    )
    .unwrap();

    let vectors = provider
        .embed(&["first text".to_string(), "second text".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
    mock.assert_async().await;
}

#[tokio::test]
async fn embedding_provider_retries_server_errors_then_surfaces() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(500).body("backend down");
        })
        .await;

    let provider = HttpEmbeddingProvider::new(
        server.url("/v1/embeddings"),
        "test-model",
        3,
        None,
        Duration::from_secs(5),
        1,
    )
    .unwrap();

    let result = provider.embed(&["text".to_string()]).await;

    assert!(matches!(result, Err(RagError::Embedding(_))));
    // Initial attempt plus one retry.
    assert_eq!(mock.hits_async().await, 2);
}

#[tokio::test]
async fn embedding_provider_fails_fast_on_client_errors() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(401).body("bad key");
        })
        .await;

    let provider = HttpEmbeddingProvider::new(
        server.url("/v1/embeddings"),
        "test-model",
        3,
        None,
        Duration::from_secs(5),
        3,
    )
    .unwrap();

    let result = provider.embed(&["text".to_string()]).await;

    assert!(matches!(result, Err(RagError::Embedding(_))));
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn embedding_provider_rejects_wrong_dimensions() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200)
                .json_body(json!({"data": [{"embedding": [0.1, 0.2]}]}));
        })
        .await;

    let provider = HttpEmbeddingProvider::new(
        server.url("/v1/embeddings"),
        "test-model",
        3,
        None,
        Duration::from_secs(5),
        0,
    )
    .unwrap();

    let result = provider.embed(&["text".to_string()]).await;
    assert!(matches!(result, Err(RagError::Embedding(_))));
}

#[tokio::test]
async fn completion_provider_extracts_candidate_text() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1beta/models/test-model:generateContent");
            then.status(200).json_body(json!({
                "candidates": [
                    {"content": {"parts": [{"text": "  The budget passed.  "}]}}
                ]
            }));
        })
        .await;

    let provider = HttpCompletionProvider::new(
        server.url("/v1beta"),
        "test-model",
        None,
        Duration::from_secs(5),
        0,
    )
    .unwrap();

    let answer = provider.complete("what happened?").await.unwrap();
    assert_eq!(answer, "The budget passed.");
    mock.assert_async().await;
}

#[tokio::test]
async fn completion_provider_treats_empty_candidates_as_failure() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1beta/models/test-model:generateContent");
            then.status(200).json_body(json!({"candidates": []}));
        })
        .await;

    let provider = HttpCompletionProvider::new(
        server.url("/v1beta"),
        "test-model",
        None,
        Duration::from_secs(5),
        1,
    )
    .unwrap();

    let result = provider.complete("what happened?").await;

    assert!(matches!(result, Err(RagError::Generation(_))));
    assert_eq!(mock.hits_async().await, 2);
}

#[tokio::test]
async fn indexing_continues_when_the_embedding_backend_is_down() {
    use newsrag::chunking::Chunker;
    use newsrag::ingestion::{Article, CorpusIndexer};
    use newsrag::stores::{MemoryVectorIndex, VectorIndex};

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(503).body("overloaded");
        })
        .await;

    let provider = Arc::new(
        HttpEmbeddingProvider::new(
            server.url("/v1/embeddings"),
            "test-model",
            3,
            None,
            Duration::from_secs(5),
            0,
        )
        .unwrap(),
    );
    let index = Arc::new(MemoryVectorIndex::new("test-model", 3));
    let indexer =
        CorpusIndexer::new(provider, index.clone(), Chunker::new(20, 5, 0).unwrap(), 2).unwrap();

    let article = Article {
        id: "a1".to_string(),
        title: "Title".to_string(),
        content: long_paragraph(),
        url: "https://example.com/a1".to_string(),
        published_date: chrono::Utc::now(),
        source: "example.com".to_string(),
        summary: String::new(),
        word_count: 30,
        ingestion_date: chrono::Utc::now(),
    };

    let summary = indexer.index_articles(&[article]).await.unwrap();

    assert!(summary.chunks_dropped > 0);
    assert_eq!(summary.chunks_written, 0);
    assert_eq!(index.count().await.unwrap(), 0);
}
