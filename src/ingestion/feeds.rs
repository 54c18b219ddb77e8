//! Syndication feed fetching and parsing.
//!
//! Both RSS 2.0 (`<item>`) and Atom (`<entry>`) items are reduced to the
//! handful of fields the rest of the pipeline needs. Each feed contributes
//! at most a fixed number of candidates so one prolific source cannot
//! dominate an ingestion run, and a failing feed yields an empty list
//! instead of aborting the batch.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::Client;
use tracing::{info, warn};

use crate::types::{RagError, RagResult};

/// One candidate article discovered in a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub summary: String,
}

/// Downloads feeds and parses their items.
pub struct FeedFetcher {
    client: Client,
    max_items: usize,
}

impl FeedFetcher {
    pub fn new(client: Client, max_items: usize) -> Self {
        Self { client, max_items }
    }

    /// Fetches every feed concurrently. Order of the result matches the
    /// input order; failed feeds appear with an empty item list.
    pub async fn fetch_all(&self, feeds: &[String]) -> Vec<(String, Vec<FeedItem>)> {
        let futures = feeds.iter().map(|url| async move {
            let items = self.fetch_feed(url).await;
            (url.clone(), items)
        });
        futures_util::future::join_all(futures).await
    }

    /// Fetches one feed; any failure is logged and becomes an empty list.
    pub async fn fetch_feed(&self, url: &str) -> Vec<FeedItem> {
        match self.try_fetch(url).await {
            Ok(items) => {
                info!(%url, count = items.len(), "feed fetched");
                items
            }
            Err(err) => {
                warn!(%url, error = %err, "feed fetch failed, skipping");
                Vec::new()
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> RagResult<Vec<FeedItem>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| RagError::Feed(err.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|err| RagError::Feed(err.to_string()))?;
        parse_feed(&body, self.max_items)
    }
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Link,
    Published,
    Summary,
}

#[derive(Default)]
struct PartialItem {
    title: String,
    link: String,
    published: String,
    summary: String,
}

impl PartialItem {
    fn push(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Published => &mut self.published,
            Field::Summary => &mut self.summary,
        };
        if !target.is_empty() {
            target.push(' ');
        }
        target.push_str(text.trim());
    }

    fn finish(self) -> Option<FeedItem> {
        let link = self.link.trim().to_string();
        if link.is_empty() {
            return None;
        }
        let title = if self.title.is_empty() {
            "Untitled".to_string()
        } else {
            self.title
        };
        Some(FeedItem {
            title,
            link,
            published: parse_feed_date(&self.published),
            summary: self.summary,
        })
    }
}

/// Parses an RSS or Atom document into at most `max_items` items.
pub fn parse_feed(xml: &str, max_items: usize) -> RagResult<Vec<FeedItem>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<PartialItem> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Err(err) => return Err(RagError::Feed(format!("malformed feed: {err}"))),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    current = Some(PartialItem::default());
                    field = None;
                }
                b"title" if current.is_some() => field = Some(Field::Title),
                b"link" if current.is_some() => {
                    // Atom carries the target in an attribute; RSS as text.
                    if let Some(href) = link_href(&e) {
                        if let Some(item) = current.as_mut() {
                            if item.link.is_empty() {
                                item.link = href;
                            }
                        }
                        field = None;
                    } else {
                        field = Some(Field::Link);
                    }
                }
                b"pubDate" | b"published" | b"updated" if current.is_some() => {
                    field = Some(Field::Published)
                }
                b"description" | b"summary" if current.is_some() => field = Some(Field::Summary),
                _ => field = None,
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link" {
                    if let (Some(item), Some(href)) = (current.as_mut(), link_href(&e)) {
                        if item.link.is_empty() {
                            item.link = href;
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(item), Some(field)) = (current.as_mut(), field) {
                    item.push(field, &t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::CData(t)) => {
                if let (Some(item), Some(field)) = (current.as_mut(), field) {
                    item.push(field, &String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    if let Some(partial) = current.take() {
                        if let Some(item) = partial.finish() {
                            items.push(item);
                            if items.len() >= max_items {
                                break;
                            }
                        }
                    }
                    field = None;
                }
                _ => field = None,
            },
            Ok(_) => {}
        }
    }

    Ok(items)
}

/// Returns the `href` attribute of an Atom `<link>` unless it points at a
/// non-alternate relation (self, enclosure, ...).
fn link_href(element: &BytesStart<'_>) -> Option<String> {
    let mut href = None;
    for attr in element.attributes().flatten() {
        match attr.key.as_ref() {
            b"href" => href = attr.unescape_value().ok().map(|v| v.into_owned()),
            b"rel" => {
                let rel = attr.unescape_value().ok()?;
                if rel != "alternate" {
                    return None;
                }
            }
            _ => {}
        }
    }
    href
}

fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
