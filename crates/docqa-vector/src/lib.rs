//! # docqa-vector
//!
//! An embedded nearest-neighbour index that owns the mapping from vector slot
//! to chunk metadata and persists both as one crash-safe snapshot.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docqa_vector::{Config, SlotMetadata, VectorStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), docqa_vector::Error> {
//!     let store = VectorStore::open(Config::persistent("./data/index", "all-minilm", 384)).await?;
//!
//!     let report = store.add(vec![vec![0.1f32; 384]], vec![SlotMetadata {
//!         chunk_id: "c-1".into(),
//!         document_id: "note-7".into(),
//!         chunk_index: 0,
//!         text: "Patient denies chest pain.".into(),
//!     }]).await?;
//!
//!     let hits = store.search(&[0.1f32; 384], 5)?;
//!     assert_eq!(hits[0].slot, report.slot_ids[0]);
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Readers work on an immutable snapshot published through `ArcSwap` and never
//! block. Writers serialize on one async mutex, build the next snapshot from a
//! copy, persist it, and publish it only after the commit succeeded. Across
//! processes the store directory supports one writer and any number of readers
//! that call [`VectorStore::reload`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod distance;
pub mod error;
mod index;
mod persistence;
mod state;
pub mod types;

pub use config::{Config, DeletePolicy, IndexKind};
pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use types::{
    AddReport, DeleteOutcome, IndexState, RebuildReport, SearchHit, SlotId, SlotMetadata,
    StoreStats, TrainingReport,
};

use arc_swap::ArcSwap;
use state::StoreState;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Handle to one vector store.
///
/// Cloning is cheap; all clones share the same index.
#[derive(Clone)]
pub struct VectorStore {
    inner: Arc<VectorStoreInner>,
}

struct VectorStoreInner {
    config: Config,
    state: ArcSwap<StoreState>,
    /// Single-writer discipline for slot allocation and snapshot commits.
    writer: Mutex<()>,
}

impl VectorStore {
    /// Open or create a store with the given configuration.
    ///
    /// A persistent store loads its committed snapshot. A missing snapshot
    /// starts an empty index; an unusable one is logged at warn level and also
    /// starts an empty index, so opening only fails on configuration or I/O
    /// errors that prevent creating the directory.
    #[instrument(skip(config), fields(
        model = %config.embedding_model,
        dimension = config.dimension,
        index = %config.index,
        persistent = config.data_path.is_some()
    ))]
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let state = match &config.data_path {
            Some(dir) => Self::load_or_fresh(dir, &config).await?,
            None => StoreState::empty(&config, 0),
        };

        info!(
            vectors = state.index.len(),
            state = %state.index.state(),
            "Opened vector store"
        );

        Ok(Self {
            inner: Arc::new(VectorStoreInner {
                config,
                state: ArcSwap::from_pointee(state),
                writer: Mutex::new(()),
            }),
        })
    }

    async fn load_or_fresh(dir: &Path, config: &Config) -> Result<StoreState> {
        tokio::fs::create_dir_all(dir).await?;

        match persistence::load(dir, config).await {
            Ok(Some(state)) => Ok(state),
            Ok(None) => {
                info!(path = ?dir, "No committed snapshot, starting with an empty index");
                Ok(StoreState::empty(config, 0))
            }
            Err(e) => {
                warn!(
                    path = ?dir,
                    error = %e,
                    "Persisted index unusable, starting with an empty index; previously indexed vectors are lost"
                );
                let generation = persistence::latest_generation(dir).await;
                Ok(StoreState::empty(config, generation))
            }
        }
    }

    /// The configuration this store was opened with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Current training state.
    pub fn state(&self) -> IndexState {
        self.inner.state.load().index.state()
    }

    /// Number of physical vectors, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.inner.state.load().index.len()
    }

    /// Whether the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a batch of vectors with their chunk metadata.
    ///
    /// Slots `[next_id, next_id + n)` are assigned in input order, and the new
    /// snapshot is persisted before this returns. An untrained IVF index is
    /// trained on this batch first; that happens exactly once and later
    /// batches are never used to retrain it (see [`AddReport::training`]).
    #[instrument(skip(self, vectors, metadata), fields(batch = vectors.len()))]
    pub async fn add(
        &self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<SlotMetadata>,
    ) -> Result<AddReport> {
        if vectors.len() != metadata.len() {
            error!(
                vectors = vectors.len(),
                metadata = metadata.len(),
                "Rejected batch with mismatched metadata"
            );
            return Err(Error::BatchSizeMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }

        {
            let current = self.inner.state.load();
            for vector in &vectors {
                if let Err(e) = current.index.check_vector(vector) {
                    error!(error = %e, "Rejected vector batch");
                    return Err(e);
                }
            }
        }

        if vectors.is_empty() {
            return Ok(AddReport {
                slot_ids: Vec::new(),
                training: None,
            });
        }

        let _writer = self.inner.writer.lock().await;
        let mut next = StoreState::clone(&self.inner.state.load_full());

        let training = next
            .index
            .train_if_needed(&vectors, self.inner.config.train_iterations);
        if let Some(report) = &training {
            info!(
                training_vectors = report.training_vectors,
                lists = report.lists,
                iterations = report.iterations,
                "Index trained on first batch; centroids are fixed for all later additions"
            );
        }

        let first = next.next_id;
        let count = vectors.len() as SlotId;
        let slot_ids: Vec<SlotId> = (first..first + count).collect();

        for ((slot, vector), meta) in slot_ids.iter().zip(&vectors).zip(metadata) {
            next.index.push(*slot, vector);
            next.metadata.insert(*slot, meta);
        }
        next.next_id = first + count;

        self.commit(next).await?;

        debug!(first_slot = first, count, "Added vectors");
        Ok(AddReport { slot_ids, training })
    }

    /// Return up to `top_k` hits ordered by descending similarity, ties by
    /// ascending slot id.
    ///
    /// No similarity floor is applied here. Tombstoned slots and slots without
    /// metadata are skipped.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let state = self.inner.state.load_full();
        state.index.check_vector(query)?;

        let metric = state.index.metric();
        let raw = state
            .index
            .search(query, top_k, |slot| state.tombstones.contains(&slot));

        let mut hits = Vec::with_capacity(raw.len());
        for (slot, distance) in raw {
            match state.metadata.get(&slot) {
                Some(meta) => hits.push(SearchHit {
                    slot,
                    similarity: metric.to_similarity(distance),
                    distance,
                    metadata: meta.clone(),
                }),
                None => debug!(slot, "Skipping slot without metadata"),
            }
        }

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.slot.cmp(&b.slot))
        });
        Ok(hits)
    }

    /// Remove a document's vectors according to the configured [`DeletePolicy`].
    #[instrument(skip(self))]
    pub async fn delete_by_document(&self, document_id: &str) -> Result<DeleteOutcome> {
        match self.inner.config.delete_policy {
            DeletePolicy::Report => {
                let matching_slots = self.inner.state.load().live_slots_for(document_id).count();
                warn!(
                    document_id,
                    matching_slots,
                    "Delete requested on append-only index; no vectors were removed"
                );
                Ok(DeleteOutcome::Unsupported { matching_slots })
            }
            DeletePolicy::Tombstone => {
                let _writer = self.inner.writer.lock().await;
                let current = self.inner.state.load_full();

                let slots: Vec<SlotId> = current.live_slots_for(document_id).collect();
                if slots.is_empty() {
                    debug!(document_id, "No live slots for document");
                    return Ok(DeleteOutcome::Tombstoned { slots });
                }

                let mut next = StoreState::clone(&current);
                next.tombstones.extend(slots.iter().copied());
                self.commit(next).await?;

                info!(document_id, slots = slots.len(), "Tombstoned document");
                Ok(DeleteOutcome::Tombstoned { slots })
            }
        }
    }

    /// Physically drop tombstoned slots.
    ///
    /// Slot ids of surviving vectors are kept and `next_id` does not move, so
    /// ids are never reused. An IVF index is retrained on the survivors.
    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let _writer = self.inner.writer.lock().await;
        let current = self.inner.state.load_full();

        if current.tombstones.is_empty() {
            return Ok(RebuildReport {
                removed: 0,
                remaining: current.index.len(),
                training: None,
            });
        }

        let (mut index, survivors) = current
            .index
            .compact(|slot| !current.tombstones.contains(&slot));
        let training = index.train_if_needed(&survivors, self.inner.config.train_iterations);

        let removed = current.index.len() - index.len();
        let remaining = index.len();
        let metadata = current
            .metadata
            .iter()
            .filter(|(slot, _)| !current.tombstones.contains(*slot))
            .map(|(slot, meta)| (*slot, meta.clone()))
            .collect();

        let next = StoreState {
            index,
            metadata,
            tombstones: Default::default(),
            next_id: current.next_id,
            generation: current.generation,
        };
        self.commit(next).await?;

        info!(removed, remaining, retrained = training.is_some(), "Rebuilt index");
        Ok(RebuildReport {
            removed,
            remaining,
            training,
        })
    }

    /// Re-read the committed snapshot from disk.
    ///
    /// Meant for search-only processes sharing a directory with one writer.
    /// Returns `true` when a newer snapshot was published. An unusable
    /// snapshot leaves the current one in place.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<bool> {
        let Some(dir) = &self.inner.config.data_path else {
            return Ok(false);
        };

        let _writer = self.inner.writer.lock().await;
        match persistence::load(dir, &self.inner.config).await {
            Ok(Some(state)) => {
                let current = self.inner.state.load();
                if state.generation == current.generation {
                    return Ok(false);
                }
                info!(
                    generation = state.generation,
                    vectors = state.index.len(),
                    "Reloaded index snapshot"
                );
                self.inner.state.store(Arc::new(state));
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                warn!(error = %e, "Reload failed, keeping the current snapshot");
                Ok(false)
            }
        }
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> StoreStats {
        self.inner.state.load().stats(&self.inner.config)
    }

    /// Validate, persist and publish `next`. Caller holds the writer lock.
    async fn commit(&self, mut next: StoreState) -> Result<()> {
        if let Err(e) = next.check_alignment() {
            error!(error = %e, "Refusing to commit misaligned snapshot");
            return Err(e);
        }

        next.generation += 1;
        if let Some(dir) = &self.inner.config.data_path {
            if let Err(e) = persistence::save(dir, &next, &self.inner.config).await {
                error!(error = %e, "Snapshot commit failed; previous snapshot remains current");
                return Err(e);
            }
        }

        self.inner.state.store(Arc::new(next));
        Ok(())
    }
}
