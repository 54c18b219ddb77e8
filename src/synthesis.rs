//! Grounded answer synthesis.
//!
//! The synthesizer builds a prompt from the retrieved passages (with
//! attribution metadata) and the recent conversation, calls the language
//! model, and derives the citation list and a confidence score from the
//! retrieval similarities. With no grounding available it answers with a
//! canned "no information" response instead of letting the model fabricate
//! one — the model is never called in that case.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::{debug, warn};

use crate::session::{Role, Turn};
use crate::stores::RetrievalHit;
use crate::types::{RagError, RagResult};

/// Canned answer when retrieval produced no qualifying context.
pub const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant information in the news \
     articles to answer your question. Please try asking about current events or topics \
     covered in recent coverage.";

/// An article citation attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_date: DateTime<Utc>,
}

/// The synthesizer's output: answer text, citations, confidence in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisResult {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
}

/// Generates text from a prompt.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> RagResult<String>;
}

/// Remote language model speaking the `generateContent` REST shape.
///
/// Transient failures (429, 5xx, network errors, responses with no
/// candidates) are retried with exponential backoff; exhaustion surfaces as
/// a generation failure, never as a fabricated answer.
pub struct HttpCompletionProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl HttpCompletionProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
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
            api_key,
            max_retries,
        })
    }

    fn url(&self) -> String {
        let mut url = format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        );
        if let Some(key) = &self.api_key {
            let _ = write!(url, "?key={key}");
        }
        url
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn complete(&self, prompt: &str) -> RagResult<String> {
        let payload = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };
        let url = self.url();
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }

            match self.client.post(&url).json(&payload).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: GenerateResponse = match response.json().await {
                            Ok(parsed) => parsed,
                            Err(err) => {
                                warn!(error = %err, attempt, "malformed model response, will retry");
                                last_err = Some(RagError::Generation(err.to_string()));
                                continue;
                            }
                        };
                        let text = parsed
                            .candidates
                            .into_iter()
                            .next()
                            .and_then(|c| c.content.parts.into_iter().next())
                            .map(|p| p.text.trim().to_string());
                        match text {
                            Some(text) if !text.is_empty() => return Ok(text),
                            _ => {
                                warn!(attempt, "model response had no candidates, will retry");
                                last_err = Some(RagError::Generation(
                                    "model returned no candidates".into(),
                                ));
                                continue;
                            }
                        }
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "model call failed, will retry");
                        last_err =
                            Some(RagError::Generation(format!("model API {status}: {body}")));
                        continue;
                    }
                    return Err(RagError::Generation(format!("model API {status}: {body}")));
                }
                Err(err) => {
                    warn!(error = %err, attempt, "model request error, will retry");
                    last_err = Some(RagError::Generation(err.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| RagError::Generation("generation failed after retries".into())))
    }
}

/// Builds prompts and turns model output into an attributed answer.
pub struct Synthesizer {
    provider: std::sync::Arc<dyn CompletionProvider>,
    history_window: usize,
}

impl Synthesizer {
    pub fn new(provider: std::sync::Arc<dyn CompletionProvider>, history_window: usize) -> Self {
        Self {
            provider,
            history_window,
        }
    }

    /// Produces a grounded answer for `query` from the retrieved hits and
    /// recent conversation.
    pub async fn synthesize(
        &self,
        query: &str,
        hits: &[RetrievalHit],
        history: &[Turn],
    ) -> RagResult<SynthesisResult> {
        if hits.is_empty() {
            debug!("no qualifying context, returning canned response");
            return Ok(SynthesisResult {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
            });
        }

        let prompt = build_prompt(query, hits, history, self.history_window);
        let answer = self.provider.complete(&prompt).await?;

        Ok(SynthesisResult {
            answer,
            sources: dedup_sources(hits),
            confidence: mean_similarity(hits),
        })
    }
}

/// Assembles the grounding prompt: context passages with attribution, the
/// recent conversation window, the question, and the answering rules.
pub fn build_prompt(
    query: &str,
    hits: &[RetrievalHit],
    history: &[Turn],
    history_window: usize,
) -> String {
    let mut prompt = String::from(
        "You are a news analysis assistant. Based on the following retrieved news \
         articles, provide a well-structured answer to the user's question.\n\n",
    );

    let _ = write!(prompt, "USER QUESTION: {query}\n\nRETRIEVED NEWS ARTICLES:\n");
    for (position, hit) in hits.iter().enumerate() {
        let _ = write!(
            prompt,
            "\nArticle {number}:\nTitle: {title}\nSource: {source}\nPublished: {published}\n\
             Relevance Score: {score:.3}\nContent: {content}\n---\n",
            number = position + 1,
            title = hit.chunk.title,
            source = hit.chunk.source,
            published = hit.chunk.published_date.to_rfc3339(),
            score = hit.similarity,
            content = hit.chunk.text,
        );
    }

    let recent = history.len().saturating_sub(history_window);
    if !history[recent..].is_empty() {
        prompt.push_str("\nCONVERSATION SO FAR:\n");
        for turn in &history[recent..] {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let _ = writeln!(prompt, "{role}: {text}", text = turn.text);
        }
    }

    prompt.push_str(
        "\nINSTRUCTIONS:\n\
         1. Answer using only information from the retrieved articles.\n\
         2. Synthesize across sources when several are relevant.\n\
         3. Cite the article titles or sources you draw from.\n\
         4. If the articles only partially cover the question, say what is \
         available and what is missing.\n\
         5. If the articles do not contain relevant information, state that \
         clearly.\n\nRESPONSE:",
    );
    prompt
}

/// Citations deduplicated by (title, url) in rank order.
fn dedup_sources(hits: &[RetrievalHit]) -> Vec<SourceRef> {
    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();
    for hit in hits {
        let key = (hit.chunk.title.clone(), hit.chunk.url.clone());
        if seen.insert(key) {
            sources.push(SourceRef {
                title: hit.chunk.title.clone(),
                url: hit.chunk.url.clone(),
                source: hit.chunk.source.clone(),
                published_date: hit.chunk.published_date,
            });
        }
    }
    sources
}

fn mean_similarity(hits: &[RetrievalHit]) -> f32 {
    if hits.is_empty() {
        return 0.0;
    }
    let mean = hits.iter().map(|h| h.similarity).sum::<f32>() / hits.len() as f32;
    mean.clamp(0.0, 1.0)
}

/// Scripted completion provider for tests; counts how often it is called.
pub struct MockCompletionProvider {
    reply: String,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockCompletionProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Number of completed calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(&self, _prompt: &str) -> RagResult<String> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}
