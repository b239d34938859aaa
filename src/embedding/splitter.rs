//! Recursive character splitter.
//!
//! Tries paragraph, line, word and finally character boundaries, then merges
//! the pieces back into chunks of at most `chunk_size` characters, carrying
//! up to `chunk_overlap` characters of context into the next chunk.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A chunk with its position in the source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    /// Character offset of the chunk in the original text.
    pub start_offset: usize,
    pub chunk_index: usize,
}

#[derive(Debug, Clone)]
pub struct RecursiveTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ApiError> {
        if chunk_size == 0 {
            return Err(ApiError::BadRequest("chunk_size must be at least 1".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(ApiError::BadRequest(format!(
                "Got a larger chunk overlap ({}) than chunk size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_spans(text)
            .into_iter()
            .map(|span| text[span.start..span.end].to_string())
            .collect()
    }

    /// Chunks are verbatim slices of `text`, so `start_offset` always
    /// points at the chunk's first character.
    pub fn split_with_offsets(&self, text: &str) -> Vec<TextChunk> {
        self.split_spans(text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| TextChunk {
                text: text[span.start..span.end].to_string(),
                start_offset: char_len(&text[..span.start]),
                chunk_index,
            })
            .collect()
    }

    fn split_spans(&self, text: &str) -> Vec<Span> {
        self.split_recursive(text, Span { start: 0, end: text.len() }, &self.separators)
    }

    fn split_recursive(&self, source: &str, range: Span, separators: &[String]) -> Vec<Span> {
        let text = &source[range.start..range.end];

        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut next_separators: &[String] = &[];
        for (index, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate.as_str();
                next_separators = &separators[index + 1..];
                break;
            }
        }

        let mut final_chunks = Vec::new();
        let mut good_splits: Vec<Span> = Vec::new();
        for piece in pieces(text, range.start, separator) {
            if char_len(piece.text(source)) < self.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(source, &good_splits));
                good_splits.clear();
            }

            if next_separators.is_empty() {
                final_chunks.extend(piece.trimmed(source));
            } else {
                final_chunks.extend(self.split_recursive(source, piece, next_separators));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(source, &good_splits));
        }

        final_chunks
    }

    /// Merges neighbouring pieces while the source text they cover, gaps
    /// included, fits in `chunk_size`.
    fn merge_splits(&self, source: &str, splits: &[Span]) -> Vec<Span> {
        let covered = |from: usize, to: usize| char_len(&source[from..to]);
        let mut docs = Vec::new();
        let mut current: VecDeque<Span> = VecDeque::new();

        for piece in splits {
            let joined = |current: &VecDeque<Span>| {
                covered(current.front().map_or(piece.start, |first| first.start), piece.end)
            };
            let held = |current: &VecDeque<Span>| match (current.front(), current.back()) {
                (Some(first), Some(last)) => covered(first.start, last.end),
                _ => 0,
            };

            if !current.is_empty() && joined(&current) > self.chunk_size {
                docs.extend(Span::covering(&current).and_then(|span| span.trimmed(source)));

                while !current.is_empty()
                    && (held(&current) > self.chunk_overlap || joined(&current) > self.chunk_size)
                {
                    current.pop_front();
                }
            }

            current.push_back(*piece);
        }

        docs.extend(Span::covering(&current).and_then(|span| span.trimmed(source)));
        docs
    }
}

/// Byte range into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    fn covering(spans: &VecDeque<Span>) -> Option<Span> {
        Some(Span {
            start: spans.front()?.start,
            end: spans.back()?.end,
        })
    }

    /// Whitespace-only spans yield `None`.
    fn trimmed(self, source: &str) -> Option<Span> {
        let text = self.text(source);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let start = self.start + (text.len() - text.trim_start().len());
        Some(Span {
            start,
            end: start + trimmed.len(),
        })
    }
}

/// Non-empty pieces of `text` between occurrences of `separator`, as spans
/// of the source starting at `base`. An empty separator yields characters.
fn pieces(text: &str, base: usize, separator: &str) -> Vec<Span> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(idx, ch)| Span {
                start: base + idx,
                end: base + idx + ch.len_utf8(),
            })
            .collect();
    }

    let mut spans = Vec::new();
    let mut start = 0usize;
    for (idx, matched) in text.match_indices(separator) {
        if idx > start {
            spans.push(Span { start: base + start, end: base + idx });
        }
        start = idx + matched.len();
    }
    if start < text.len() {
        spans.push(Span { start: base + start, end: base + text.len() });
    }
    spans
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let splitter = RecursiveTextSplitter::new(100, 10).unwrap();
        assert_eq!(splitter.split_text("  Cats are cool :)  "), vec!["Cats are cool :)"]);
        assert!(splitter.split_text("   \n\n  ").is_empty());
    }

    #[test]
    fn words_overlap_between_chunks() {
        let splitter = RecursiveTextSplitter::new(10, 5).unwrap();
        let chunks = splitter.split_text("aaaa bbbb cccc dddd");
        assert_eq!(chunks, vec!["aaaa bbbb", "bbbb cccc", "cccc dddd"]);
    }

    #[test]
    fn paragraphs_are_preferred_boundaries() {
        let splitter = RecursiveTextSplitter::new(12, 2).unwrap();
        let chunks = splitter.split_text("para one.\n\npara two.");
        assert_eq!(chunks, vec!["para one.", "para two."]);
    }

    #[test]
    fn no_chunk_exceeds_chunk_size() {
        let splitter = RecursiveTextSplitter::new(40, 8).unwrap();
        let text = "Retrieval augmented generation grounds answers in documents.\n"
            .repeat(12)
            + &"x".repeat(130);
        let chunks = splitter.split_text(&text);

        assert!(chunks.len() > 5);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40, "oversized chunk: {:?}", chunk);
        }
    }

    #[test]
    fn offsets_point_into_source_text() {
        let splitter = RecursiveTextSplitter::new(10, 5).unwrap();
        let text = "zażółć gęślą jaźń aaaa";
        let chunks = splitter.split_with_offsets(text);

        let chars: Vec<char> = text.chars().collect();
        for chunk in &chunks {
            let len = chunk.text.chars().count();
            let slice: String = chars[chunk.start_offset..chunk.start_offset + len].iter().collect();
            assert_eq!(slice, chunk.text);
        }
        assert_eq!(chunks[0].chunk_index, 0);
        assert!(chunks.windows(2).all(|w| w[0].start_offset < w[1].start_offset));
    }

    #[test]
    fn offsets_survive_repeated_separators() {
        let splitter = RecursiveTextSplitter::new(12, 2).unwrap();
        let text = "alpha  beta gamma\n\n\n\ndelta epsilon";
        let chunks = splitter.split_with_offsets(text);

        let chars: Vec<char> = text.chars().collect();
        for chunk in &chunks {
            let len = chunk.text.chars().count();
            assert!(len <= 12, "oversized chunk: {:?}", chunk.text);
            let slice: String = chars[chunk.start_offset..chunk.start_offset + len].iter().collect();
            assert_eq!(slice, chunk.text);
        }
        assert_eq!(chunks[0].text, "alpha  beta");
        assert!(chunks.iter().any(|c| c.text == "delta" && c.start_offset == 21));

        let splitter = RecursiveTextSplitter::new(5, 0).unwrap();
        let chunks = splitter.split_with_offsets("aa bb cc  dd");
        let last = chunks.last().unwrap();
        assert_eq!(last.text, "dd");
        assert_eq!(last.start_offset, 10);
        assert!(chunks.iter().any(|c| c.text == "cc" && c.start_offset == 6));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(RecursiveTextSplitter::new(10, 10).is_err());
        assert!(RecursiveTextSplitter::new(0, 0).is_err());
    }
}
