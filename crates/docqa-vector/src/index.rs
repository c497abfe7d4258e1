//! Flat and IVF-flat index storage.
//!
//! Vectors are stored row-major in one contiguous buffer. Row `i` belongs to
//! `slots[i]`; rows are only ever appended, except by [`VectorIndex::compact`].

use crate::config::IndexKind;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::types::{IndexState, SlotId, TrainingReport};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Coarse quantizer of a trained IVF index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Quantizer {
    centroids: Vec<Vec<f32>>,
    /// Row positions per inverted list.
    lists: Vec<Vec<usize>>,
}

impl Quantizer {
    fn nearest_lists(&self, metric: DistanceMetric, vector: &[f32], n: usize) -> Vec<usize> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, metric.distance(vector, c)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().take(n).map(|(i, _)| i).collect()
    }

    fn assign(&mut self, metric: DistanceMetric, row: usize, vector: &[f32]) {
        if let Some(&list) = self.nearest_lists(metric, vector, 1).first() {
            self.lists[list].push(row);
        }
    }
}

/// In-memory index over fixed-width vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct VectorIndex {
    kind: IndexKind,
    metric: DistanceMetric,
    dimension: usize,
    slots: Vec<SlotId>,
    data: Vec<f32>,
    quantizer: Option<Quantizer>,
}

impl VectorIndex {
    pub(crate) fn new(kind: IndexKind, metric: DistanceMetric, dimension: usize) -> Self {
        Self {
            kind,
            metric,
            dimension,
            slots: Vec::new(),
            data: Vec::new(),
            quantizer: None,
        }
    }

    pub(crate) fn kind(&self) -> IndexKind {
        self.kind
    }

    pub(crate) fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub(crate) fn dimension(&self) -> usize {
        self.dimension
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slots(&self) -> &[SlotId] {
        &self.slots
    }

    pub(crate) fn state(&self) -> IndexState {
        if !self.kind.requires_training() || self.quantizer.is_some() {
            IndexState::Trained
        } else {
            IndexState::Untrained
        }
    }

    fn row(&self, row: usize) -> &[f32] {
        let start = row * self.dimension;
        &self.data[start..start + self.dimension]
    }

    /// Reject vectors of the wrong width or with non-finite components.
    pub(crate) fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidVector(
                "vector contains NaN or infinite values".into(),
            ));
        }
        Ok(())
    }

    /// Train the coarse quantizer on `sample` if this index still needs it.
    ///
    /// Returns `None` when no transition happened. Rows already present are
    /// assigned to the new lists.
    pub(crate) fn train_if_needed(
        &mut self,
        sample: &[Vec<f32>],
        iterations: usize,
    ) -> Option<TrainingReport> {
        let IndexKind::IvfFlat { nlist, .. } = self.kind else {
            return None;
        };
        if self.quantizer.is_some() || sample.is_empty() {
            return None;
        }

        let lists = nlist.min(sample.len());
        if lists < nlist {
            warn!(
                requested = nlist,
                lists,
                training_vectors = sample.len(),
                "Training batch smaller than nlist, building fewer inverted lists"
            );
        }

        let (centroids, executed) = k_means(self.metric, sample, lists, iterations);
        let mut quantizer = Quantizer {
            lists: vec![Vec::new(); centroids.len()],
            centroids,
        };
        for row in 0..self.slots.len() {
            let start = row * self.dimension;
            quantizer.assign(self.metric, row, &self.data[start..start + self.dimension]);
        }
        self.quantizer = Some(quantizer);

        Some(TrainingReport {
            training_vectors: sample.len(),
            requested_lists: nlist,
            lists,
            iterations: executed,
        })
    }

    /// Append one vector. The caller has already validated it.
    pub(crate) fn push(&mut self, slot: SlotId, vector: &[f32]) {
        let row = self.slots.len();
        self.slots.push(slot);
        self.data.extend_from_slice(vector);
        if let Some(quantizer) = self.quantizer.as_mut() {
            quantizer.assign(self.metric, row, vector);
        }
    }

    /// Return up to `k` `(slot, distance)` pairs, closest first, ties by slot.
    ///
    /// An untrained IVF index has no lists to probe and returns nothing.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        skip: impl Fn(SlotId) -> bool,
    ) -> Vec<(SlotId, f32)> {
        if k == 0 || self.slots.is_empty() {
            return Vec::new();
        }

        let rows: Vec<usize> = match (&self.kind, &self.quantizer) {
            (IndexKind::Flat, _) => (0..self.slots.len()).collect(),
            (IndexKind::IvfFlat { nprobe, .. }, Some(quantizer)) => quantizer
                .nearest_lists(self.metric, query, *nprobe)
                .into_iter()
                .flat_map(|list| quantizer.lists[list].iter().copied())
                .collect(),
            (IndexKind::IvfFlat { .. }, None) => {
                debug!("Search on untrained IVF index");
                return Vec::new();
            }
        };

        let mut candidates: Vec<(SlotId, f32)> = rows
            .into_iter()
            .filter(|&row| !skip(self.slots[row]))
            .map(|row| (self.slots[row], self.metric.distance(query, self.row(row))))
            .collect();

        candidates.sort_by(|a, b| match a.1.total_cmp(&b.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });
        candidates.truncate(k);
        candidates
    }

    /// Copy of this index keeping only rows whose slot passes `keep`.
    ///
    /// The copy is untrained when the layout requires training.
    pub(crate) fn compact(&self, keep: impl Fn(SlotId) -> bool) -> (Self, Vec<Vec<f32>>) {
        let mut next = Self::new(self.kind, self.metric, self.dimension);
        let mut kept = Vec::new();
        for (row, &slot) in self.slots.iter().enumerate() {
            if keep(slot) {
                let vector = self.row(row).to_vec();
                next.push(slot, &vector);
                kept.push(vector);
            }
        }
        (next, kept)
    }

    /// Structural checks run after decoding a persisted index.
    pub(crate) fn verify(&self) -> Result<()> {
        if self.data.len() != self.slots.len() * self.dimension {
            return Err(Error::IndexCorrupt(format!(
                "vector buffer holds {} floats for {} slots of width {}",
                self.data.len(),
                self.slots.len(),
                self.dimension
            )));
        }
        if self.slots.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::IndexCorrupt(
                "slot ids are not strictly increasing".into(),
            ));
        }
        if let Some(quantizer) = &self.quantizer {
            let assigned: usize = quantizer.lists.iter().map(Vec::len).sum();
            let in_range = quantizer
                .lists
                .iter()
                .flatten()
                .all(|&row| row < self.slots.len());
            if assigned != self.slots.len() || !in_range {
                return Err(Error::IndexCorrupt(
                    "inverted lists do not cover the stored rows".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Lloyd's k-means with evenly spaced initial centroids.
///
/// Returns the centroids and the number of iterations executed.
fn k_means(
    metric: DistanceMetric,
    sample: &[Vec<f32>],
    k: usize,
    max_iterations: usize,
) -> (Vec<Vec<f32>>, usize) {
    let k = k.min(sample.len()).max(1);
    let dim = sample[0].len();

    let step = sample.len() / k;
    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|i| sample[(i * step).min(sample.len() - 1)].clone())
        .collect();

    let mut assignments: Vec<usize> = vec![usize::MAX; sample.len()];
    let mut executed = 0;

    for _ in 0..max_iterations {
        executed += 1;

        let mut changed = false;
        for (i, vector) in sample.iter().enumerate() {
            let best = centroids
                .iter()
                .enumerate()
                .map(|(ci, c)| (ci, metric.distance(vector, c)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(ci, _)| ci)
                .unwrap_or(0);

            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        let mut sums: Vec<Vec<f32>> = vec![vec![0.0; dim]; k];
        let mut counts: Vec<usize> = vec![0; k];

        for (i, vector) in sample.iter().enumerate() {
            let c = assignments[i];
            counts[c] += 1;
            for (j, val) in vector.iter().enumerate() {
                sums[c][j] += val;
            }
        }

        for c in 0..k {
            if counts[c] > 0 {
                for j in 0..dim {
                    centroids[c][j] = sums[c][j] / counts[c] as f32;
                }
            }
        }
    }

    (centroids, executed)
}
