//! Splits article content into overlapping word windows.
//!
//! Windows overlap so that context spanning a boundary survives in at least
//! one chunk. Chunking is purely positional: re-running it over unchanged
//! content with the same parameters reproduces identical offsets and
//! lengths, which is what makes incremental re-indexing safe.

use serde::{Deserialize, Serialize};

use crate::types::{RagError, RagResult};

/// One contiguous sub-span of an article's content.
///
/// `offset`/`length` are byte positions into the cleaned content, so the
/// original span can always be reconstructed from the article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    /// Zero-based position of this chunk within the article.
    pub index: usize,
    /// Byte offset of the first word in the article content.
    pub offset: usize,
    /// Byte length of the span.
    pub length: usize,
    /// The span's text, sliced verbatim from the content.
    pub text: String,
}

/// Word-window chunker with a configurable size and overlap.
#[derive(Debug, Clone)]
pub struct Chunker {
    size_words: usize,
    overlap_words: usize,
    min_chunk_len: usize,
}

impl Chunker {
    /// Creates a chunker; the overlap must be strictly smaller than the
    /// window so that every step makes forward progress.
    pub fn new(size_words: usize, overlap_words: usize, min_chunk_len: usize) -> RagResult<Self> {
        if size_words == 0 || overlap_words >= size_words {
            return Err(RagError::Config(format!(
                "invalid chunk window: size {size_words}, overlap {overlap_words}"
            )));
        }
        Ok(Self {
            size_words,
            overlap_words,
            min_chunk_len,
        })
    }

    /// Splits `content` into overlapping spans.
    ///
    /// Windows whose text is shorter than the minimum chunk length are
    /// dropped; they carry too little signal to be worth an embedding.
    pub fn chunk(&self, content: &str) -> Vec<ChunkSpan> {
        let words = word_offsets(content);
        if words.is_empty() {
            return Vec::new();
        }

        let step = self.size_words - self.overlap_words;
        let mut spans = Vec::new();
        let mut start = 0;

        while start < words.len() {
            let end = (start + self.size_words).min(words.len());
            let (first_offset, _) = words[start];
            let (last_offset, last_word) = words[end - 1];
            let span_end = last_offset + last_word.len();
            let text = &content[first_offset..span_end];

            if text.len() >= self.min_chunk_len {
                spans.push(ChunkSpan {
                    index: spans.len(),
                    offset: first_offset,
                    length: span_end - first_offset,
                    text: text.to_string(),
                });
            }

            if end == words.len() {
                break;
            }
            start += step;
        }

        spans
    }
}

/// Whitespace-delimited words paired with their byte offsets.
fn word_offsets(content: &str) -> Vec<(usize, &str)> {
    content
        .split_whitespace()
        .map(|word| {
            let offset = word.as_ptr() as usize - content.as_ptr() as usize;
            (offset, word)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn rejects_overlap_equal_to_size() {
        assert!(Chunker::new(10, 10, 0).is_err());
    }

    #[test]
    fn short_content_yields_single_chunk() {
        let chunker = Chunker::new(100, 20, 0).unwrap();
        let text = sample_text(30);
        let spans = chunker.chunk(&text);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].offset, 0);
        assert_eq!(spans[0].text, text);
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let chunker = Chunker::new(10, 4, 0).unwrap();
        let text = sample_text(22);
        let spans = chunker.chunk(&text);
        assert!(spans.len() >= 2);

        // The second window starts size - overlap = 6 words in.
        assert!(spans[1].text.starts_with("word6"));
        // The overlapping words appear in both chunks.
        assert!(spans[0].text.contains("word6"));
        assert!(spans[0].text.contains("word9"));
        assert!(spans[1].text.contains("word9"));
    }

    #[test]
    fn offsets_reconstruct_original_spans() {
        let chunker = Chunker::new(8, 2, 0).unwrap();
        let text = "  the   quick brown fox jumps over the lazy dog again and again  ";
        for span in chunker.chunk(text) {
            assert_eq!(&text[span.offset..span.offset + span.length], span.text);
        }
    }

    #[test]
    fn rechunking_is_deterministic() {
        let chunker = Chunker::new(12, 3, 0).unwrap();
        let text = sample_text(57);
        assert_eq!(chunker.chunk(&text), chunker.chunk(&text));
    }

    #[test]
    fn drops_windows_below_minimum_length() {
        let chunker = Chunker::new(4, 1, 50).unwrap();
        let spans = chunker.chunk("tiny words only here");
        assert!(spans.is_empty());
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        let chunker = Chunker::new(10, 2, 0).unwrap();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\t ").is_empty());
    }
}
