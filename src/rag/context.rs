//! Context assembler: ranked chunks to a numbered, model-ready block.

use docqa_vector::{SearchHit, SlotId};
use serde::{Deserialize, Serialize};

/// Context text used when retrieval found nothing.
pub const NO_CONTEXT: &str = "No relevant context found.";

/// One numbered source in an assembled context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// 1-based rank position, the number the model sees as `[Source k]`.
    pub source: usize,
    pub slot: SlotId,
    pub chunk_id: String,
    pub document_id: String,
    pub similarity: f32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Source for a 1-based source number.
    pub fn source(&self, number: usize) -> Option<&SourceRef> {
        number.checked_sub(1).and_then(|i| self.sources.get(i))
    }
}

/// Number `hits` in rank order and render them as `[Source k] text` blocks.
///
/// Pure: the same input always yields byte-identical output.
pub fn assemble(hits: &[SearchHit]) -> AssembledContext {
    if hits.is_empty() {
        return AssembledContext {
            text: NO_CONTEXT.to_string(),
            sources: Vec::new(),
        };
    }

    let sources: Vec<SourceRef> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| SourceRef {
            source: i + 1,
            slot: hit.slot,
            chunk_id: hit.metadata.chunk_id.clone(),
            document_id: hit.metadata.document_id.clone(),
            similarity: hit.similarity,
            text: hit.metadata.text.clone(),
        })
        .collect();

    let text = sources
        .iter()
        .map(|s| format!("[Source {}] {}", s.source, s.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    AssembledContext { text, sources }
}
