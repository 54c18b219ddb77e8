//! Article content extraction.
//!
//! Pages are reduced to their primary text through a prioritized selector
//! cascade: article-like containers first, generic containers next, and a
//! raw paragraph sweep as the last resort. The first candidate with enough
//! text wins. This is heuristic by design — selector misses on unusual
//! layouts show up as short extractions and are rejected, not treated as
//! bugs.

use regex::Regex;
use reqwest::Client;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::types::{RagError, RagResult};

/// Elements whose text is never article content.
const NON_CONTENT_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside"];

/// Content-region selectors, tried in priority order.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    ".article-content",
    ".story-body",
    ".entry-content",
    "main .content",
    ".post-content",
    ".article-body",
    r#"[role="main"]"#,
];

/// Fetches article pages and extracts their primary text.
pub struct ArticleExtractor {
    client: Client,
    /// Minimum cleaned length for a selector candidate to be accepted.
    min_candidate_len: usize,
    /// Minimum viable article length; shorter extractions are rejected.
    min_article_len: usize,
    /// Extracted content is truncated to this many characters.
    max_article_len: usize,
}

impl ArticleExtractor {
    pub fn new(
        client: Client,
        min_candidate_len: usize,
        min_article_len: usize,
        max_article_len: usize,
    ) -> Self {
        Self {
            client,
            min_candidate_len,
            min_article_len,
            max_article_len,
        }
    }

    /// Downloads `url` and extracts its content. Any failure — network,
    /// HTTP status, or content below the viable minimum — yields `None`;
    /// the article is skipped, not the batch.
    pub async fn scrape(&self, url: &str) -> Option<String> {
        match self.try_scrape(url).await {
            Ok(content) => Some(content),
            Err(err) => {
                warn!(%url, error = %err, "article skipped");
                None
            }
        }
    }

    /// Like [`scrape`](Self::scrape), but reports why extraction failed.
    pub async fn try_scrape(&self, url: &str) -> RagResult<String> {
        let html = self
            .fetch(url)
            .await
            .map_err(|err| RagError::Extraction(err.to_string()))?;
        self.extract(&html).ok_or_else(|| {
            RagError::Extraction(format!("content below viable minimum for {url}"))
        })
    }

    async fn fetch(&self, url: &str) -> reqwest::Result<String> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Runs the selector cascade over already-fetched HTML.
    ///
    /// Returns `None` when the final cleaned content is shorter than the
    /// viable minimum — the signal of a paywall, script-rendered page, or
    /// anti-scraping response.
    pub fn extract(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);

        let mut content = String::new();
        for selector in CONTENT_SELECTORS {
            let Ok(parsed) = Selector::parse(selector) else {
                continue;
            };
            if let Some(element) = document.select(&parsed).next() {
                let candidate = collapse_whitespace(&element_text(element));
                if candidate.chars().count() > self.min_candidate_len {
                    debug!(selector, "content selector accepted");
                    content = candidate;
                    break;
                }
            }
        }

        // Fall back to every paragraph on the page.
        if content.chars().count() <= self.min_candidate_len {
            if let Ok(paragraph) = Selector::parse("p") {
                let joined = document
                    .select(&paragraph)
                    .map(element_text)
                    .collect::<Vec<_>>()
                    .join(" ");
                content = collapse_whitespace(&joined);
            }
        }

        let content = truncate_chars(&content, self.max_article_len);
        if content.chars().count() < self.min_article_len {
            return None;
        }
        Some(content)
    }
}

/// Collects an element's text, skipping non-content subtrees.
fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el) => {
                if NON_CONTENT_TAGS.contains(&el.name()) {
                    continue;
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    collect_text(child_ref, out);
                }
            }
            _ => {}
        }
    }
}

/// Collapses runs of whitespace to single spaces and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern"));
    re.replace_all(text, " ").trim().to_string()
}

/// Truncates to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((boundary, _)) => text[..boundary].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ArticleExtractor {
        ArticleExtractor::new(Client::new(), 200, 100, 2000)
    }

    fn filler(words: usize) -> String {
        std::iter::repeat("reporting")
            .take(words)
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn prefers_article_container_over_paragraphs() {
        let body = filler(60);
        let html = format!(
            "<html><body>\
             <p>unrelated sidebar text that is long enough to matter {body}</p>\
             <article>lead paragraph {body}</article>\
             </body></html>"
        );
        let content = extractor().extract(&html).unwrap();
        assert!(content.starts_with("lead paragraph"));
        assert!(!content.contains("unrelated sidebar"));
    }

    #[test]
    fn strips_non_content_elements_inside_container() {
        let body = filler(60);
        let html = format!(
            "<article>\
             <script>var tracking = true;</script>\
             <style>.x {{ color: red }}</style>\
             <nav>home | world | sport</nav>\
             <p>{body}</p>\
             <footer>copyright notice</footer>\
             </article>"
        );
        let content = extractor().extract(&html).unwrap();
        assert!(!content.contains("tracking"));
        assert!(!content.contains("color: red"));
        assert!(!content.contains("home | world"));
        assert!(!content.contains("copyright"));
        assert!(content.contains("reporting"));
    }

    #[test]
    fn falls_back_to_paragraph_aggregation() {
        let body = filler(40);
        let html = format!(
            "<html><body><div><p>first {body}</p><p>second {body}</p></div></body></html>"
        );
        let content = extractor().extract(&html).unwrap();
        assert!(content.contains("first"));
        assert!(content.contains("second"));
    }

    #[test]
    fn short_selector_match_is_not_accepted() {
        let body = filler(60);
        // The article tag matches first but is too short; the paragraph
        // fallback should still recover the page text.
        let html = format!("<article>too short</article><p>{body}</p>");
        let content = extractor().extract(&html).unwrap();
        assert!(content.contains("reporting"));
    }

    #[test]
    fn rejects_content_below_viable_minimum() {
        let html = "<article><p>just a stub</p></article>";
        assert!(extractor().extract(html).is_none());
    }

    #[test]
    fn truncates_to_maximum_length() {
        let body = filler(600);
        let html = format!("<article><p>{body}</p></article>");
        let content = extractor().extract(&html).unwrap();
        assert_eq!(content.chars().count(), 2000);
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(
            collapse_whitespace("  a \n\n b\t\tc  "),
            "a b c".to_string()
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
