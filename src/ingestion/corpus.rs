//! The article corpus: the ingestion pipeline's durable output.
//!
//! A flat JSON collection rewritten wholesale on each ingestion run — not a
//! queryable database. Articles are immutable once written; re-ingestion
//! supersedes them with fresh records.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::types::{RagError, RagResult};

/// A processed news article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    /// Corpus-unique token: millisecond timestamp plus a random suffix.
    pub id: String,
    pub title: String,
    /// Cleaned, truncated body text.
    pub content: String,
    pub url: String,
    pub published_date: DateTime<Utc>,
    /// Host of the article URL, without a leading `www.` label.
    pub source: String,
    /// Feed-provided summary, truncated.
    pub summary: String,
    pub word_count: usize,
    pub ingestion_date: DateTime<Utc>,
}

impl Article {
    /// Generates a fresh corpus id.
    pub fn generate_id() -> String {
        let suffix: String = Uuid::new_v4().simple().to_string();
        format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
    }
}

/// Derives the source label from an article URL.
///
/// Falls back to `"unknown"` when the URL has no parseable host.
pub fn source_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .host_str()
                .map(|host| host.strip_prefix("www.").unwrap_or(host).to_string())
        })
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Persists the article collection as a single JSON file.
#[derive(Debug, Clone)]
pub struct CorpusStore {
    path: PathBuf,
}

impl CorpusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the corpus file with the given articles.
    pub async fn save(&self, articles: &[Article]) -> RagResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let serialized = serde_json::to_string_pretty(articles)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        fs::write(&self.path, serialized).await?;
        info!(count = articles.len(), path = %self.path.display(), "corpus saved");
        Ok(())
    }

    /// Reloads the full corpus; a missing file is an empty corpus.
    pub async fn load(&self) -> RagResult<Vec<Article>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path).await?;
        serde_json::from_str(&data).map_err(|err| RagError::Storage(err.to_string()))
    }
}
