//! Text chunking for document indexing.
//!
//! Four strategies are available:
//! - **paragraph**: blank-line separated blocks; oversized blocks are re-split
//!   with the sliding window. Offsets are character positions in the stream of
//!   kept paragraphs, not in the source document.
//! - **section**: blocks introduced by header-like markers (markdown headings,
//!   numbered items, `ALL CAPS:` labels, `**bold**` runs), each prefixed with
//!   its header. Offsets are character positions in the stream of emitted
//!   sections, the same convention as paragraphs.
//! - **sliding_window**: fixed word windows with overlap. Offsets are word
//!   indices. The minimum size filter still counts characters.
//! - **semantic**: paragraph segmentation under its own tag.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{AppError, Result};

const SECTION_MARKER: &str = r"(?:^|\n)(?:#{1,6}\s+|\d+\.\s+|[A-Z][A-Z\s]+:|\*\*[^*]+\*\*)";
const PARAGRAPH_BREAK: &str = r"\n\s*\n";

/// Available chunking strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    #[default]
    Paragraph,
    Section,
    SlidingWindow,
    Semantic,
}

/// Unit in which a strategy reports `start`/`end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    Characters,
    Words,
}

impl ChunkingStrategy {
    pub const ALL: [ChunkingStrategy; 4] = [
        ChunkingStrategy::Paragraph,
        ChunkingStrategy::Section,
        ChunkingStrategy::SlidingWindow,
        ChunkingStrategy::Semantic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ChunkingStrategy::Paragraph => "paragraph",
            ChunkingStrategy::Section => "section",
            ChunkingStrategy::SlidingWindow => "sliding_window",
            ChunkingStrategy::Semantic => "semantic",
        }
    }

    pub fn offset_unit(&self) -> OffsetUnit {
        match self {
            ChunkingStrategy::SlidingWindow => OffsetUnit::Words,
            _ => OffsetUnit::Characters,
        }
    }
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ChunkingStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "paragraph" => Ok(Self::Paragraph),
            "section" => Ok(Self::Section),
            "sliding_window" | "sliding-window" | "window" => Ok(Self::SlidingWindow),
            "semantic" => Ok(Self::Semantic),
            _ => Err(AppError::InvalidStrategy(format!(
                "Unknown chunking strategy: {}. Use: paragraph, section, sliding_window, semantic",
                s
            ))),
        }
    }
}

/// Sizes shared by every strategy.
///
/// `chunk_size` and `chunk_overlap` count words; `min_chunk_size` and
/// `max_chunk_size` count characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            min_chunk_size: 50,
            max_chunk_size: 1000,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(AppError::InvalidStrategy(
                "chunk_size must be positive".into(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AppError::InvalidStrategy(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(AppError::InvalidStrategy(format!(
                "min_chunk_size ({}) exceeds max_chunk_size ({})",
                self.min_chunk_size, self.max_chunk_size
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// One segment produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the emitted sequence.
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub strategy: ChunkingStrategy,
    /// Header that introduced a section chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

/// A word window over a list of words.
struct Window {
    start: usize,
    end: usize,
    text: String,
}

pub struct Chunker {
    config: ChunkerConfig,
    paragraph_break: Regex,
    section_marker: Regex,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;

        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| AppError::Internal(format!("Invalid chunker pattern: {}", e)))
        };

        Ok(Self {
            config,
            paragraph_break: compile(PARAGRAPH_BREAK)?,
            section_marker: compile(SECTION_MARKER)?,
        })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` with `strategy`. Each call is independent of the last.
    pub fn chunk(&self, text: &str, strategy: ChunkingStrategy) -> Vec<Chunk> {
        match strategy {
            ChunkingStrategy::Paragraph | ChunkingStrategy::Semantic => {
                self.paragraphs(text, strategy)
            }
            ChunkingStrategy::Section => self.sections(text),
            ChunkingStrategy::SlidingWindow => self.sliding_window(text),
        }
    }

    /// Like [`Chunker::chunk`], with the strategy given by name.
    pub fn chunk_named(&self, text: &str, strategy: &str) -> Result<Vec<Chunk>> {
        Ok(self.chunk(text, strategy.parse()?))
    }

    fn windows(&self, words: &[&str]) -> Vec<Window> {
        let mut windows = Vec::new();
        let mut start = 0;

        while start < words.len() {
            let end = (start + self.config.chunk_size).min(words.len());
            let text = words[start..end].join(" ");
            if text.chars().count() >= self.config.min_chunk_size {
                windows.push(Window { start, end, text });
            }
            start += self.config.step();
        }

        windows
    }

    fn sliding_window(&self, text: &str) -> Vec<Chunk> {
        let words: Vec<&str> = text.split_whitespace().collect();

        self.windows(&words)
            .into_iter()
            .enumerate()
            .map(|(index, window)| Chunk {
                index,
                text: window.text,
                start: window.start,
                end: window.end,
                strategy: ChunkingStrategy::SlidingWindow,
                header: None,
            })
            .collect()
    }

    fn paragraphs(&self, text: &str, strategy: ChunkingStrategy) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut position = 0;

        for raw in self.paragraph_break.split(text) {
            let paragraph = raw.trim();
            let length = paragraph.chars().count();
            if length < self.config.min_chunk_size {
                continue;
            }

            if length > self.config.max_chunk_size {
                let words: Vec<&str> = paragraph.split_whitespace().collect();
                // Character offset of each word within the space-joined paragraph.
                let mut word_offsets = Vec::with_capacity(words.len());
                let mut offset = 0;
                for word in &words {
                    word_offsets.push(offset);
                    offset += word.chars().count() + 1;
                }

                for window in self.windows(&words) {
                    let start = position + word_offsets[window.start];
                    let end = start + window.text.chars().count();
                    chunks.push(Chunk {
                        index: chunks.len(),
                        text: window.text,
                        start,
                        end,
                        strategy,
                        header: None,
                    });
                }
            } else {
                chunks.push(Chunk {
                    index: chunks.len(),
                    text: paragraph.to_string(),
                    start: position,
                    end: position + length,
                    strategy,
                    header: None,
                });
            }

            position += length;
        }

        chunks
    }

    fn sections(&self, text: &str) -> Vec<Chunk> {
        let markers: Vec<regex::Match<'_>> = self.section_marker.find_iter(text).collect();

        // (header, body byte range) pairs; the first body has no header.
        let mut bodies = Vec::with_capacity(markers.len() + 1);
        let mut cursor = 0;
        let mut header: Option<regex::Match<'_>> = None;
        for marker in &markers {
            bodies.push((header, cursor..marker.start()));
            header = Some(*marker);
            cursor = marker.end();
        }
        bodies.push((header, cursor..text.len()));

        let mut chunks = Vec::new();
        let mut position = 0;
        for (header, range) in bodies {
            let body = text[range].trim();
            if body.chars().count() < self.config.min_chunk_size {
                continue;
            }

            let (full_text, header_text) = match header {
                Some(marker) => {
                    let label = marker.as_str().trim();
                    (
                        format!("{} {}", label, body).trim().to_string(),
                        Some(label.to_string()),
                    )
                }
                None => (body.to_string(), None),
            };

            let end = position + full_text.chars().count();
            chunks.push(Chunk {
                index: chunks.len(),
                text: full_text,
                start: position,
                end,
                strategy: ChunkingStrategy::Section,
                header: header_text.filter(|h| !h.is_empty()),
            });
            position = end;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn chunker(chunk_size: usize, chunk_overlap: usize, min: usize, max: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size,
            chunk_overlap,
            min_chunk_size: min,
            max_chunk_size: max,
        })
        .unwrap()
    }

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{:02}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    const NOTE: &str = "DISCHARGE SUMMARY:\nPatient is a 67 year old male admitted with community acquired pneumonia.\n\n\
## Hospital Course\nTreated with ceftriaxone and azithromycin, afebrile after 48 hours of therapy.\n\n\
1. Continue oral antibiotics for five more days and follow up with primary care.\n\n\
**Allergies** Penicillin causes hives; no other known drug allergies reported.\n\nok";

    #[test]
    fn test_sliding_window_starts() {
        let chunks = chunker(10, 3, 1, 1000).chunk(&words(25), ChunkingStrategy::SlidingWindow);

        let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0, 7, 14, 21]);
        assert_eq!(chunks[3].end, 25);
        assert_eq!(chunks[3].text.split_whitespace().count(), 4);
        assert_eq!(chunks[1].text.split_whitespace().next(), Some("word07"));
    }

    #[test]
    fn test_sliding_window_min_size_counts_characters() {
        // Two-word tail "word20 word21" is 13 characters.
        let chunks = chunker(10, 0, 14, 1000).chunk(&words(22), ChunkingStrategy::SlidingWindow);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_paragraph_drops_short_and_tracks_stream_offsets() {
        let text = "First paragraph with enough text.\n\nno\n\n  Second paragraph, also long enough.  ";
        let chunks = chunker(512, 50, 20, 1000).chunk(text, ChunkingStrategy::Paragraph);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First paragraph with enough text.");
        assert_eq!((chunks[0].start, chunks[0].end), (0, 33));
        assert_eq!(chunks[1].text, "Second paragraph, also long enough.");
        assert_eq!((chunks[1].start, chunks[1].end), (33, 68));
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_long_paragraph_is_split_into_windows() {
        let long = words(30);
        let text = format!("Intro paragraph that is kept.\n\n{}", long);
        let chunks = chunker(10, 2, 5, 100).chunk(&text, ChunkingStrategy::Paragraph);

        assert_eq!(chunks[0].text, "Intro paragraph that is kept.");
        let subs = &chunks[1..];
        assert_eq!(subs.len(), 4);
        assert!(subs.iter().enumerate().all(|(i, c)| c.index == i + 1));
        assert!(subs[0].text.starts_with("word00"));
        assert!(subs[1].text.starts_with("word08"));
        // Sub-chunks sit inside the parent paragraph's span.
        let parent_start = chunks[0].end;
        let parent_end = parent_start + long.chars().count();
        assert!(subs.iter().all(|c| c.start >= parent_start && c.end <= parent_end));
        assert_eq!(subs[1].start, parent_start + 8 * 7);
    }

    #[test]
    fn test_semantic_is_retagged_paragraph() {
        let c = chunker(512, 50, 10, 1000);
        let paragraph = c.chunk(NOTE, ChunkingStrategy::Paragraph);
        let semantic = c.chunk(NOTE, ChunkingStrategy::Semantic);

        assert_eq!(paragraph.len(), semantic.len());
        for (p, s) in paragraph.iter().zip(&semantic) {
            assert_eq!((p.index, &p.text, p.start, p.end), (s.index, &s.text, s.start, s.end));
            assert_eq!(s.strategy, ChunkingStrategy::Semantic);
        }
    }

    #[test]
    fn test_sections_prefix_headers() {
        let chunks = chunker(512, 50, 20, 1000).chunk(NOTE, ChunkingStrategy::Section);

        let headers: Vec<Option<&str>> = chunks.iter().map(|c| c.header.as_deref()).collect();
        assert_eq!(
            headers,
            vec![
                Some("DISCHARGE SUMMARY:"),
                Some("##"),
                Some("1."),
                Some("**Allergies**"),
            ]
        );
        assert!(chunks[0].text.starts_with("DISCHARGE SUMMARY: Patient is a 67"));
        assert!(chunks[1].text.starts_with("## Hospital Course\nTreated with"));
        assert_eq!(chunks[0].start, 0);

        // Offsets run over the concatenated section texts.
        let stream: String = chunks.iter().map(|c| c.text.as_str()).collect();
        let stream: Vec<char> = stream.chars().collect();
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        for chunk in &chunks {
            assert_eq!(chunk.end - chunk.start, chunk.text.chars().count());
            let slice: String = stream[chunk.start..chunk.end].iter().collect();
            assert_eq!(slice, chunk.text);
        }
        assert!(chunks[3].text.starts_with("**Allergies**"));
    }

    #[test]
    fn test_sections_drop_short_bodies() {
        let text = "NOTE:\nshort\n\nPLAN:\nA much longer plan body that clears the minimum size.";
        let chunks = chunker(512, 50, 20, 1000).chunk(text, ChunkingStrategy::Section);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].header.as_deref(), Some("PLAN:"));
        assert_eq!(chunks[0].index, 0);
    }

    #[rstest]
    #[case::paragraph(ChunkingStrategy::Paragraph)]
    #[case::section(ChunkingStrategy::Section)]
    #[case::sliding_window(ChunkingStrategy::SlidingWindow)]
    #[case::semantic(ChunkingStrategy::Semantic)]
    fn test_offsets_stay_within_working_unit(#[case] strategy: ChunkingStrategy) {
        let mut text = NOTE.to_string();
        text.push_str("\n\n");
        text.push_str(&words(400));

        let chunks = chunker(40, 8, 10, 200).chunk(&text, strategy);
        assert!(!chunks.is_empty());

        let bound = match strategy.offset_unit() {
            OffsetUnit::Characters => text.chars().count(),
            OffsetUnit::Words => text.split_whitespace().count(),
        };
        for chunk in &chunks {
            assert!(chunk.start <= chunk.end);
            assert!(chunk.end <= bound, "{:?} exceeds {}", chunk, bound);
            assert_eq!(chunk.strategy, strategy);
        }
    }

    #[rstest]
    #[case("paragraph", ChunkingStrategy::Paragraph)]
    #[case("SECTION", ChunkingStrategy::Section)]
    #[case("sliding-window", ChunkingStrategy::SlidingWindow)]
    #[case("semantic", ChunkingStrategy::Semantic)]
    fn test_parse_strategy(#[case] name: &str, #[case] expected: ChunkingStrategy) {
        assert_eq!(name.parse::<ChunkingStrategy>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let err = chunker(10, 2, 1, 100).chunk_named("text", "sentences").unwrap_err();
        assert!(matches!(err, AppError::InvalidStrategy(_)));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let config = ChunkerConfig {
            chunk_size: 10,
            chunk_overlap: 10,
            ..ChunkerConfig::default()
        };
        assert!(matches!(
            Chunker::new(config),
            Err(AppError::InvalidStrategy(_))
        ));
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let c = chunker(10, 2, 1, 100);
        for strategy in ChunkingStrategy::ALL {
            assert!(c.chunk("   \n\n  ", strategy).is_empty());
        }
    }
}
