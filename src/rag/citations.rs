//! Citation extraction from generated answers.
//!
//! The model cites sources with the same `[Source k]` markers the context
//! assembler wrote. Every in-range marker becomes one [`Citation`]; markers
//! naming a source that was never provided are dropped without error.

use docqa_vector::SlotId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rag::context::SourceRef;
use crate::types::{AppError, Result};

const SOURCE_MARKER: &str = r"\[Source (\d+)\]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based source number as written by the model.
    pub source: usize,
    /// `"Source k"`.
    pub source_id: String,
    pub slot: SlotId,
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_text: String,
    pub similarity: f32,
}

pub struct CitationExtractor {
    marker: Regex,
}

impl CitationExtractor {
    pub fn new() -> Result<Self> {
        let marker = Regex::new(SOURCE_MARKER)
            .map_err(|e| AppError::Internal(format!("Invalid citation pattern: {}", e)))?;
        Ok(Self { marker })
    }

    /// One citation per marker occurrence, in answer order. Duplicates are kept.
    pub fn extract(&self, answer: &str, sources: &[SourceRef]) -> Vec<Citation> {
        let mut citations = Vec::new();

        for caps in self.marker.captures_iter(answer) {
            // Numbers too large for usize are out of range like any other.
            let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) else {
                continue;
            };
            let Some(source) = number.checked_sub(1).and_then(|i| sources.get(i)) else {
                debug!(number, available = sources.len(), "Dropping out-of-range citation");
                continue;
            };

            citations.push(Citation {
                source: number,
                source_id: format!("Source {}", number),
                slot: source.slot,
                chunk_id: source.chunk_id.clone(),
                document_id: source.document_id.clone(),
                chunk_text: source.text.clone(),
                similarity: source.similarity,
            });
        }

        citations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::context::assemble;
    use docqa_vector::{SearchHit, SlotMetadata};

    fn context(n: usize) -> Vec<SourceRef> {
        let hits: Vec<SearchHit> = (0..n)
            .map(|i| SearchHit {
                slot: i as u64,
                similarity: 0.9,
                distance: 0.1,
                metadata: SlotMetadata {
                    chunk_id: format!("c{}", i),
                    document_id: "doc".into(),
                    chunk_index: i,
                    text: format!("fact {}", i),
                },
            })
            .collect();
        assemble(&hits).sources
    }

    #[test]
    fn test_out_of_range_marker_is_dropped() {
        let extractor = CitationExtractor::new().unwrap();
        let citations = extractor.extract(
            "Dose was raised [Source 1] after review [Source 9].",
            &context(3),
        );
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].source, 1);
        assert_eq!(citations[0].source_id, "Source 1");
        assert_eq!(citations[0].chunk_id, "c0");
    }

    #[test]
    fn test_duplicates_are_kept() {
        let extractor = CitationExtractor::new().unwrap();
        let citations = extractor.extract("[Source 2] and again [Source 2]", &context(2));
        assert_eq!(citations.len(), 2);
        assert!(citations.iter().all(|c| c.chunk_id == "c1"));
    }

    #[test]
    fn test_malformed_markers_are_ignored() {
        let extractor = CitationExtractor::new().unwrap();
        let answer = "[Source 0] [source 1] [Source x] [Source 99999999999999999999999] [Source 1";
        assert!(extractor.extract(answer, &context(3)).is_empty());
    }

    #[test]
    fn test_no_sources() {
        let extractor = CitationExtractor::new().unwrap();
        assert!(extractor.extract("[Source 1]", &context(0)).is_empty());
    }
}
