//! Token-budgeted paragraph chunking.
//!
//! Chunk boundaries follow paragraph structure:
//!
//! - Paragraphs are separated by blank lines; empty paragraphs are dropped.
//! - Paragraphs are packed greedily into a chunk until the next one would exceed the budget.
//! - A paragraph that alone exceeds the budget is cut into fixed windows of `max_tokens` words
//!   (no overlap), after flushing whatever was pending so source order is preserved.
//! - Once `max_chunks` chunks exist the chunker stops, even mid-document. Later content is not
//!   represented; this bounds memory, embedding cost and index size per document.
//!
//! Token counting uses a word tokenizer (`\b\w+\b`). It approximates, but does not match, the
//! tokenizer of any particular embedding model, so budgets should leave headroom below the
//! provider's context window.
//!
//! OCR output carries `--- Page N ---` marker lines. A paragraph starting with a marker updates
//! the current page; the marker line itself is not part of the chunk text.

use crate::config::ChunkingPolicy;
use regex::Regex;
use std::sync::OnceLock;

use super::types::{Chunk, ChunkingError};

fn word_pattern() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\b\w+\b").expect("word pattern compiles"))
}

fn paragraph_break() -> &'static Regex {
    static BREAK: OnceLock<Regex> = OnceLock::new();
    BREAK.get_or_init(|| Regex::new(r"\n\s*\n").expect("paragraph pattern compiles"))
}

fn page_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"^-{3}\s*Page\s+(\d+)\s*-{3}$").expect("page marker pattern compiles")
    })
}

/// Split text into word tokens.
pub fn tokenize(text: &str) -> Vec<&str> {
    word_pattern().find_iter(text).map(|m| m.as_str()).collect()
}

/// Count word tokens without allocating.
pub fn count_tokens(text: &str) -> usize {
    word_pattern().find_iter(text).count()
}

/// Format the marker line that prefixes a page of OCR output.
pub fn page_marker_line(page_number: u32) -> String {
    format!("--- Page {page_number} ---")
}

/// Pick the per-chunk token budget for a document.
///
/// Short documents use `short_chunk_tokens` so they still split into several chunks; long ones
/// use `long_chunk_tokens` to fit more of the text under the `max_chunks` ceiling.
pub fn select_token_budget(text: &str, policy: &ChunkingPolicy) -> usize {
    if count_tokens(text) < policy.long_document_tokens {
        policy.short_chunk_tokens
    } else {
        policy.long_chunk_tokens
    }
}

#[derive(Debug)]
struct Paragraph<'a> {
    text: &'a str,
    page_number: Option<u32>,
}

fn split_paragraphs(text: &str) -> Vec<Paragraph<'_>> {
    let mut current_page = None;
    let mut paragraphs = Vec::new();

    for raw in paragraph_break().split(text) {
        let mut body = raw.trim();
        if body.is_empty() {
            continue;
        }

        let first_line = body.lines().next().unwrap_or_default().trim();
        if let Some(captures) = page_marker().captures(first_line) {
            current_page = captures[1].parse().ok();
            body = body[body.find('\n').map_or(body.len(), |idx| idx + 1)..].trim();
            if body.is_empty() {
                continue;
            }
        }

        paragraphs.push(Paragraph {
            text: body,
            page_number: current_page,
        });
    }

    paragraphs
}

/// Accumulates emitted chunks and tracks the cap.
struct ChunkSink<'a> {
    document_id: &'a str,
    max_chunks: usize,
    chunks: Vec<Chunk>,
}

impl<'a> ChunkSink<'a> {
    fn new(document_id: &'a str, max_chunks: usize) -> Self {
        Self {
            document_id,
            max_chunks,
            chunks: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.chunks.len() >= self.max_chunks
    }

    /// Emit a chunk; returns `true` when the cap has been reached.
    fn emit(&mut self, text: String, tokenized_text: String, page_number: Option<u32>) -> bool {
        let chunk_index = self.chunks.len();
        self.chunks.push(Chunk {
            document_id: self.document_id.to_string(),
            chunk_index,
            text,
            tokenized_text,
            page_number,
        });
        self.is_full()
    }
}

#[derive(Default)]
struct Pending<'a> {
    paragraphs: Vec<&'a str>,
    tokens: Vec<&'a str>,
    page_number: Option<u32>,
}

impl<'a> Pending<'a> {
    fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    fn push(&mut self, paragraph: &Paragraph<'a>, tokens: Vec<&'a str>) {
        if self.paragraphs.is_empty() {
            self.page_number = paragraph.page_number;
        }
        self.paragraphs.push(paragraph.text);
        self.tokens.extend(tokens);
    }

    fn flush_into(&mut self, sink: &mut ChunkSink<'_>) -> bool {
        let pending = std::mem::take(self);
        sink.emit(
            pending.paragraphs.join("\n\n"),
            pending.tokens.join(" "),
            pending.page_number,
        )
    }
}

/// Split `text` into ordered chunks of at most `max_tokens` word tokens, producing at most
/// `max_chunks` chunks for `document_id`.
///
/// Fails with [`ChunkingError::InvalidInput`] when the text is empty or contains no word
/// tokens, and with [`ChunkingError::InvalidChunkSize`] when either budget is zero.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    max_chunks: usize,
) -> Result<Vec<Chunk>, ChunkingError> {
    if max_tokens == 0 || max_chunks == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Err(ChunkingError::InvalidInput(
            "text must be a non-empty string".into(),
        ));
    }

    let paragraphs = split_paragraphs(text);
    if paragraphs.iter().all(|paragraph| count_tokens(paragraph.text) == 0) {
        return Err(ChunkingError::InvalidInput(
            "text contains no word tokens".into(),
        ));
    }

    let mut sink = ChunkSink::new(document_id, max_chunks);
    let mut pending = Pending::default();
    let mut pending_tokens = 0;

    for paragraph in &paragraphs {
        let tokens = tokenize(paragraph.text);
        let token_count = tokens.len();
        // Paragraphs without word tokens would yield chunks with nothing to embed.
        if token_count == 0 {
            continue;
        }

        if token_count > max_tokens {
            if !pending.is_empty() && pending.flush_into(&mut sink) {
                return Ok(sink.chunks);
            }
            pending_tokens = 0;
            for window in tokens.chunks(max_tokens) {
                let joined = window.join(" ");
                if sink.emit(joined.clone(), joined, paragraph.page_number) {
                    return Ok(sink.chunks);
                }
            }
            continue;
        }

        if pending_tokens + token_count > max_tokens {
            if pending.flush_into(&mut sink) {
                return Ok(sink.chunks);
            }
            pending_tokens = 0;
        }
        pending.push(paragraph, tokens);
        pending_tokens += token_count;
    }

    if !pending.is_empty() && !sink.is_full() {
        pending.flush_into(&mut sink);
    }

    tracing::trace!(
        document_id,
        chunks = sink.chunks.len(),
        max_tokens,
        max_chunks,
        "Chunked document"
    );
    Ok(sink.chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_paragraphs_until_budget_is_exceeded() {
        let text = "This is a test paragraph.\n\nThis is another test paragraph.";
        let chunks = chunk_text("test_document", text, 5, 2).expect("chunks");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].document_id, "test_document");
        assert!(chunks[0].text.contains("test paragraph"));
        assert!(chunks[1].text.contains("another test paragraph"));
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn oversized_paragraph_is_windowed_and_capped() {
        let text = "Word ".repeat(1000);
        let chunks = chunk_text("large_document", &text, 100, 5).expect("chunks");

        assert_eq!(chunks.len(), 5);
        for chunk in &chunks {
            assert!(chunk.tokenized_text.split_whitespace().count() <= 100);
            assert_eq!(chunk.token_count(), 100);
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        let error = chunk_text("empty_document", "", 5, 2).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidInput(_)));
        assert!(error.to_string().contains("non-empty"));

        let error = chunk_text("blank", " \n\n\t ", 5, 2).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidInput(_)));
    }

    #[test]
    fn punctuation_only_input_is_rejected() {
        let error = chunk_text("doc", "--- ... !!!", 5, 2).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidInput(_)));
    }

    #[test]
    fn tokenless_paragraphs_never_become_chunks() {
        let chunks = chunk_text("doc", "!!!\n\nReal words here.", 5, 10).expect("chunks");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Real words here.");
        assert_eq!(chunks[0].tokenized_text, "Real words here");

        let chunks = chunk_text("doc", "alpha beta gamma\n\n***\n\ndelta", 3, 10).expect("chunks");
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|chunk| chunk.token_count() > 0));
        assert!(!chunks.iter().any(|chunk| chunk.text.contains("***")));
    }

    #[test]
    fn zero_budgets_are_rejected() {
        assert!(matches!(
            chunk_text("doc", "hello", 0, 2),
            Err(ChunkingError::InvalidChunkSize)
        ));
        assert!(matches!(
            chunk_text("doc", "hello", 5, 0),
            Err(ChunkingError::InvalidChunkSize)
        ));
    }

    #[test]
    fn pending_chunk_is_flushed_before_oversized_paragraph() {
        let text = "alpha beta\n\none two three four five six seven\n\ngamma";
        let chunks = chunk_text("doc", text, 3, 10).expect("chunks");
        let tokenized: Vec<&str> = chunks.iter().map(|c| c.tokenized_text.as_str()).collect();

        assert_eq!(
            tokenized,
            vec!["alpha beta", "one two three", "four five six", "seven", "gamma"]
        );
        let indexes: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cap_stops_mid_document() {
        let text = (0..50)
            .map(|i| format!("paragraph number {i} has words"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc", &text, 5, 3).expect("chunks");

        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].text.contains("paragraph number 2"));
        assert!(!chunks.iter().any(|c| c.text.contains("number 3 ")));
    }

    #[test]
    fn never_exceeds_budgets_across_inputs() {
        let samples = [
            "a\n\nb c d e f g h i j k l m n o p\n\nq r",
            "one paragraph only",
            "x y\n\n\n\nz\r\n\r\nw v u t s r q p o n m l k j i h g f e d c b a",
            &"lorem ipsum dolor sit amet\n\n".repeat(40),
        ];
        for text in samples {
            for max_tokens in 1..8 {
                for max_chunks in 1..6 {
                    let chunks = chunk_text("doc", text, max_tokens, max_chunks).expect("chunks");
                    assert!(!chunks.is_empty());
                    assert!(chunks.len() <= max_chunks);
                    for chunk in &chunks {
                        assert!(chunk.token_count() <= max_tokens, "{chunk:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn preserves_source_order_of_tokens() {
        let text = "first second\n\nthird fourth fifth\n\nsixth seventh eighth ninth tenth eleventh";
        let chunks = chunk_text("doc", text, 4, 100).expect("chunks");
        let rebuilt: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.tokenized_text.split_whitespace())
            .collect();
        assert_eq!(rebuilt, tokenize(text));
    }

    #[test]
    fn page_markers_tag_chunks_and_are_stripped() {
        let text = format!(
            "\n\n{}\nscanned text on page one\n\n{}\npage two text\n\nmore of page two",
            page_marker_line(1),
            page_marker_line(2)
        );
        let chunks = chunk_text("scan.pdf", &text, 5, 10).expect("chunks");

        assert_eq!(chunks[0].page_number, Some(1));
        assert!(!chunks[0].text.contains("Page"));
        assert_eq!(chunks.last().unwrap().page_number, Some(2));
        assert!(chunks.iter().all(|c| !c.tokenized_text.contains("Page")));
    }

    #[test]
    fn budget_selection_depends_on_document_length() {
        let policy = ChunkingPolicy {
            long_document_tokens: 10,
            ..ChunkingPolicy::default()
        };
        assert_eq!(select_token_budget("a short note", &policy), 100);
        assert_eq!(select_token_budget(&"word ".repeat(10), &policy), 200);
    }
}
