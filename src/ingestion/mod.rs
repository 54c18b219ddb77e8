//! Batch ingestion: syndication feeds in, a persisted corpus and vector
//! index out.
//!
//! * [`feeds`] — feed fetching and RSS/Atom parsing.
//! * [`extract`] — article content extraction via a selector cascade.
//! * [`corpus`] — the durable article collection.
//! * [`pipeline`] — batch orchestration and operator-facing summaries.

pub mod corpus;
pub mod extract;
pub mod feeds;
pub mod pipeline;

pub use corpus::{Article, CorpusStore, source_from_url};
pub use extract::ArticleExtractor;
pub use feeds::{FeedFetcher, FeedItem, parse_feed};
pub use pipeline::{CorpusIndexer, IndexSummary, IngestionPipeline, IngestionSummary};
