//! The committed contents of a store: index rows plus slot metadata.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::types::{SlotId, SlotMetadata, StoreStats};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One immutable snapshot of a store.
///
/// Writers clone the current snapshot, mutate the clone, persist it and then
/// publish it; readers only ever see published snapshots.
#[derive(Debug, Clone)]
pub(crate) struct StoreState {
    pub(crate) index: VectorIndex,
    pub(crate) metadata: BTreeMap<SlotId, SlotMetadata>,
    pub(crate) tombstones: BTreeSet<SlotId>,
    pub(crate) next_id: SlotId,
    /// Snapshot sequence number; names the on-disk snapshot directory.
    pub(crate) generation: u64,
}

impl StoreState {
    pub(crate) fn empty(config: &Config, generation: u64) -> Self {
        Self {
            index: VectorIndex::new(config.index, config.metric, config.dimension),
            metadata: BTreeMap::new(),
            tombstones: BTreeSet::new(),
            next_id: 0,
            generation,
        }
    }

    /// Slots of `document_id` that are still searchable.
    pub(crate) fn live_slots_for<'a>(
        &'a self,
        document_id: &'a str,
    ) -> impl Iterator<Item = SlotId> + 'a {
        self.metadata
            .iter()
            .filter(move |(slot, meta)| {
                meta.document_id == document_id && !self.tombstones.contains(*slot)
            })
            .map(|(slot, _)| *slot)
    }

    /// Every index row must own exactly one metadata record and vice versa.
    pub(crate) fn check_alignment(&self) -> Result<()> {
        if self.index.len() != self.metadata.len() {
            return Err(Error::Consistency(format!(
                "index holds {} vectors but {} metadata records",
                self.index.len(),
                self.metadata.len()
            )));
        }
        if !self.index.slots().iter().eq(self.metadata.keys()) {
            return Err(Error::Consistency(
                "index slots and metadata slots differ".into(),
            ));
        }
        if let Some(&last) = self.index.slots().last() {
            if last >= self.next_id {
                return Err(Error::Consistency(format!(
                    "slot {} is not below next_id {}",
                    last, self.next_id
                )));
            }
        }
        if let Some(orphan) = self.tombstones.iter().find(|s| !self.metadata.contains_key(*s)) {
            return Err(Error::Consistency(format!(
                "tombstone for unknown slot {}",
                orphan
            )));
        }
        Ok(())
    }

    pub(crate) fn stats(&self, config: &Config) -> StoreStats {
        let documents: HashSet<&str> = self
            .metadata
            .iter()
            .filter(|(slot, _)| !self.tombstones.contains(*slot))
            .map(|(_, meta)| meta.document_id.as_str())
            .collect();

        StoreStats {
            total_vectors: self.index.len(),
            live_chunks: self.metadata.len() - self.tombstones.len(),
            tombstoned: self.tombstones.len(),
            documents: documents.len(),
            dimension: self.index.dimension(),
            index_type: self.index.kind().name().to_string(),
            metric: self.index.metric().name().to_string(),
            state: self.index.state(),
            next_id: self.next_id,
            embedding_model: config.embedding_model.clone(),
        }
    }
}
