//! Recursive boundary-preferring text chunker.
//!
//! Splits document segments into [`Chunk`]s of at most `chunk_size`
//! characters, with consecutive chunks sharing exactly `chunk_overlap`
//! characters. Inside each window the cut lands on the best boundary
//! available, in this order:
//!
//! 1. paragraph break (`\n\n`)
//! 2. line break (`\n`)
//! 3. sentence terminator (`.`, `!`, `?`, `;` and their full-width forms)
//! 4. whitespace
//! 5. the window end (hard cut)
//!
//! Chunks are exact slices of the source text, so dropping each chunk's
//! leading overlap and concatenating reconstructs the input losslessly.
//!
//! Each chunk receives a random UUID plus a SHA-256 hash of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::RagError;
use crate::models::{Chunk, Document, Metadata};

const ASCII_TERMINATORS: &[char] = &['.', '!', '?', ';'];
const WIDE_TERMINATORS: &[char] = &['。', '！', '？', '；'];

#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Whitespace,
}

const BOUNDARY_PREFERENCE: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Whitespace,
];

impl Boundary {
    /// Whether cutting right before `chars[pos]` lands on this boundary.
    fn matches(self, chars: &[char], pos: usize) -> bool {
        let prev = chars[pos - 1];
        match self {
            Boundary::Paragraph => prev == '\n' && pos >= 2 && chars[pos - 2] == '\n',
            Boundary::Line => prev == '\n',
            Boundary::Sentence => {
                WIDE_TERMINATORS.contains(&prev)
                    || (ASCII_TERMINATORS.contains(&prev)
                        && chars.get(pos).map_or(true, |c| c.is_whitespace()))
            }
            Boundary::Whitespace => prev.is_whitespace(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::validation("chunk_size must be > 0"));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::validation("chunk_overlap must be < chunk_size"));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, RagError> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split every segment of a document into ordered chunks.
    ///
    /// Chunks inherit their segment's metadata plus `chunk_index` (contiguous
    /// across the whole document) and `start_index` (character offset within
    /// the segment). A document without extractable text yields no chunks.
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for segment in &document.segments {
            let spans = self.spans(&segment.text);
            if spans.is_empty() {
                continue;
            }
            let offsets = char_byte_offsets(&segment.text);
            for (start, end) in spans {
                let text = &segment.text[offsets[start]..offsets[end]];
                let mut metadata = segment.metadata.clone();
                metadata.insert("chunk_index".to_string(), chunks.len().into());
                metadata.insert("start_index".to_string(), start.into());
                chunks.push(make_chunk(text, start, end, metadata));
            }
        }
        chunks
    }

    /// Compute `(start, end)` character spans for `text`.
    pub fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            if total - start <= self.chunk_size {
                spans.push((start, total));
                break;
            }
            let window_end = start + self.chunk_size;
            // A cut must leave more than the overlap behind, or the next
            // chunk would not advance.
            let earliest = start + self.chunk_overlap + 1;
            let cut = best_cut(&chars, earliest, window_end).unwrap_or(window_end);
            spans.push((start, cut));
            start = cut - self.chunk_overlap;
        }

        spans
    }
}

fn best_cut(chars: &[char], earliest: usize, latest: usize) -> Option<usize> {
    BOUNDARY_PREFERENCE.iter().find_map(|boundary| {
        (earliest..=latest)
            .rev()
            .find(|&pos| boundary.matches(chars, pos))
    })
}

/// Byte offset of every char boundary, plus the end of the string.
fn char_byte_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

fn make_chunk(text: &str, start: usize, end: usize, metadata: Metadata) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        text: text.to_string(),
        start,
        end,
        hash,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::DocumentFormat;
    use crate::models::Segment;
    use std::path::PathBuf;

    fn doc(texts: &[&str]) -> Document {
        Document {
            path: PathBuf::from("docs/sample.txt"),
            format: DocumentFormat::PlainText,
            segments: texts
                .iter()
                .map(|t| {
                    let mut metadata = Metadata::new();
                    metadata.insert("source".to_string(), "docs/sample.txt".into());
                    Segment {
                        text: t.to_string(),
                        metadata,
                    }
                })
                .collect(),
        }
    }

    /// Drop each chunk's leading overlap and concatenate.
    fn stitch(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut prev_end = 0;
        for (i, c) in chunks.iter().enumerate() {
            let skip = if i == 0 { 0 } else { prev_end - c.start };
            out.extend(c.text.chars().skip(skip));
            prev_end = c.end;
        }
        out
    }

    fn long_text() -> String {
        (0..120)
            .map(|i| {
                if i % 7 == 0 {
                    format!("Section {} starts here.\n\n", i)
                } else if i % 3 == 0 {
                    format!("Line {} of the manual covers battery safety\n", i)
                } else {
                    format!("Sentence {} explains the thermal runaway test. ", i)
                }
            })
            .collect()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunker = Chunker::new(512, 64).unwrap();
        let chunks = chunker.split(&doc(&["Hello, world!"]));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].metadata["chunk_index"], 0);
        assert_eq!(chunks[0].metadata["source"], "docs/sample.txt");
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let chunker = Chunker::new(512, 64).unwrap();
        assert!(chunker.split(&doc(&[""])).is_empty());
        assert!(chunker.split(&doc(&["  \n\n \t"])).is_empty());
        assert!(chunker.split(&doc(&[])).is_empty());
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert!(Chunker::new(64, 64).is_err());
        assert!(Chunker::new(0, 0).is_err());
    }

    #[test]
    fn test_lossless_reconstruction() {
        let text = long_text();
        for (size, overlap) in [(512, 64), (100, 10), (37, 5), (16, 15)] {
            let chunker = Chunker::new(size, overlap).unwrap();
            let chunks = chunker.split(&doc(&[&text]));
            assert!(chunks.len() > 1);
            assert_eq!(stitch(&chunks), text, "size={} overlap={}", size, overlap);
        }
    }

    #[test]
    fn test_lossless_with_multibyte_text() {
        let text = "电动汽车应满足以下安全要求。动力蓄电池应通过热失控测试！".repeat(40);
        let chunker = Chunker::new(50, 8).unwrap();
        let chunks = chunker.split(&doc(&[&text]));
        assert!(chunks.len() > 1);
        assert_eq!(stitch(&chunks), text);
        for c in &chunks {
            assert!(c.text.chars().count() <= 50);
        }
    }

    #[test]
    fn test_chunks_respect_size_and_overlap() {
        let text = long_text();
        let chunker = Chunker::new(512, 64).unwrap();
        let chunks = chunker.split(&doc(&[&text]));
        for c in &chunks {
            assert!(c.text.chars().count() <= 512);
            assert_eq!(c.text.chars().count(), c.end - c.start);
        }
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, 64);
            let tail: String = pair[0].text.chars().skip(pair[0].text.chars().count() - 64).collect();
            let head: String = pair[1].text.chars().take(64).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let first = "a".repeat(30);
        let second = "b ".repeat(40);
        let text = format!("{}\n\n{}", first, second);
        let chunker = Chunker::new(60, 5).unwrap();
        let spans = chunker.spans(&text);
        assert_eq!(spans[0], (0, 32));
    }

    #[test]
    fn test_prefers_sentence_over_whitespace() {
        let text = "One two three. Four five six seven eight nine ten eleven";
        let chunker = Chunker::new(30, 3).unwrap();
        let spans = chunker.spans(text);
        let first: String = text.chars().take(spans[0].1).collect();
        assert_eq!(first, "One two three.");
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let text = "x".repeat(100);
        let chunker = Chunker::new(40, 10).unwrap();
        let spans = chunker.spans(&text);
        assert_eq!(spans, vec![(0, 40), (30, 70), (60, 100)]);
    }

    #[test]
    fn test_chunk_index_contiguous_across_segments() {
        let text = "word ".repeat(60);
        let chunker = Chunker::new(50, 10).unwrap();
        let chunks = chunker.split(&doc(&[&text, "", &text]));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.metadata["chunk_index"], i);
        }
    }

    #[test]
    fn test_hash_deterministic() {
        let text = long_text();
        let chunker = Chunker::new(100, 10).unwrap();
        let c1 = chunker.split(&doc(&[&text]));
        let c2 = chunker.split(&doc(&[&text]));
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
            assert_ne!(a.id, b.id);
        }
    }
}
