//! Core types for docqa-vector.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one vector's slot in the index.
///
/// Assigned in strictly increasing order and never reused.
pub type SlotId = u64;

/// Chunk metadata snapshot owned by a slot.
///
/// The chunk text is echoed so retrieval needs no second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMetadata {
    /// Identifier of the chunk row this vector belongs to.
    pub chunk_id: String,
    /// External document identifier.
    pub document_id: String,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Chunk text.
    pub text: String,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Slot the vector lives in.
    pub slot: SlotId,
    /// Similarity in `[0, 1]`, higher is closer.
    pub similarity: f32,
    /// Native distance reported by the index metric.
    pub distance: f32,
    /// Echoed chunk metadata.
    pub metadata: SlotMetadata,
}

/// Training lifecycle of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// An approximate index that has not seen its first batch yet.
    Untrained,
    /// Ready to answer queries. Flat indexes start here.
    Trained,
}

impl IndexState {
    /// Whether the index can answer queries.
    pub fn is_trained(&self) -> bool {
        matches!(self, IndexState::Trained)
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexState::Untrained => write!(f, "untrained"),
            IndexState::Trained => write!(f, "trained"),
        }
    }
}

/// The one-time `Untrained -> Trained` transition performed by an `add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Number of vectors the quantizer was trained on.
    pub training_vectors: usize,
    /// Number of inverted lists requested by configuration.
    pub requested_lists: usize,
    /// Number of inverted lists actually built.
    pub lists: usize,
    /// Lloyd iterations executed.
    pub iterations: usize,
}

impl TrainingReport {
    /// True when the batch was smaller than the configured list count.
    pub fn is_degraded(&self) -> bool {
        self.lists < self.requested_lists
    }
}

/// Result of a successful `add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddReport {
    /// Slot ids assigned to the batch, in input order.
    pub slot_ids: Vec<SlotId>,
    /// Present when this batch trained the index.
    pub training: Option<TrainingReport>,
}

/// Result of `delete_by_document`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The store runs the `Report` policy; nothing was removed.
    Unsupported {
        /// Number of live slots that belong to the document.
        matching_slots: usize,
    },
    /// The document's slots were tombstoned and no longer appear in search.
    Tombstoned {
        /// Slots newly tombstoned by this call.
        slots: Vec<SlotId>,
    },
}

/// Result of `rebuild`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildReport {
    /// Physical vectors removed.
    pub removed: usize,
    /// Physical vectors kept.
    pub remaining: usize,
    /// Present when the compacted index was retrained.
    pub training: Option<TrainingReport>,
}

/// Point-in-time statistics for a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Physical vectors in the index, tombstoned ones included.
    pub total_vectors: usize,
    /// Slots that are searchable.
    pub live_chunks: usize,
    /// Slots hidden by tombstones, waiting for `rebuild`.
    pub tombstoned: usize,
    /// Distinct documents among live slots.
    pub documents: usize,
    /// Vector width.
    pub dimension: usize,
    /// Index layout name.
    pub index_type: String,
    /// Metric name.
    pub metric: String,
    /// Training state.
    pub state: IndexState,
    /// Next slot id to be assigned.
    pub next_id: SlotId,
    /// Embedding model the vectors belong to.
    pub embedding_model: String,
}
