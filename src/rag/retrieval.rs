//! Retrieval coordinator.
//!
//! Runs a nearest-neighbour search against the [`VectorStore`] and applies the
//! similarity floor. The store itself never filters, so the floor lives here.

use docqa_vector::{SearchHit, VectorStore};
use tracing::{debug, instrument};

use crate::types::{AppError, Result};

/// Search plus similarity floor over one vector store.
#[derive(Clone)]
pub struct RetrievalCoordinator {
    store: VectorStore,
}

impl RetrievalCoordinator {
    pub fn new(store: VectorStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Return hits with `similarity >= floor`, most similar first.
    ///
    /// Ties are broken by ascending slot id so the earliest inserted chunk
    /// wins. An empty result is not an error.
    #[instrument(skip(self, query))]
    pub async fn retrieve(&self, query: Vec<f32>, top_k: usize, floor: f32) -> Result<Vec<SearchHit>> {
        if !(0.0..=1.0).contains(&floor) {
            return Err(AppError::InvalidInput(format!(
                "Similarity floor must be within [0, 1], got {}",
                floor
            )));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // Scanning the index is CPU bound; keep it off the async workers.
        let store = self.store.clone();
        let hits = tokio::task::spawn_blocking(move || store.search(&query, top_k))
            .await
            .map_err(|e| AppError::Internal(format!("Search task failed: {}", e)))??;

        let raw = hits.len();
        let mut kept = filter_and_rank(hits, floor);
        kept.truncate(top_k);

        debug!(raw, kept = kept.len(), "Retrieved chunks");
        Ok(kept)
    }
}

/// Drop hits under `floor` and order the rest deterministically.
pub fn filter_and_rank(hits: Vec<SearchHit>, floor: f32) -> Vec<SearchHit> {
    let mut kept: Vec<SearchHit> = hits.into_iter().filter(|h| h.similarity >= floor).collect();
    kept.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.slot.cmp(&b.slot))
    });
    kept
}
