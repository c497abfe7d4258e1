//! Configuration for docqa-vector.

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for a vector store.
///
/// A store is bound to exactly one embedding space: vectors produced by a
/// different model or with a different width must never share an index.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the persisted snapshot pair. If None, data is kept in memory only.
    pub data_path: Option<PathBuf>,

    /// Name of the embedding model whose vectors this store holds.
    pub embedding_model: String,

    /// Fixed vector width.
    pub dimension: usize,

    /// Distance metric.
    pub metric: DistanceMetric,

    /// Index layout.
    pub index: IndexKind,

    /// Behavior of `delete_by_document`.
    pub delete_policy: DeletePolicy,

    /// Lloyd iterations used when training an IVF index.
    pub train_iterations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: None,
            embedding_model: "all-minilm".to_string(),
            dimension: 384,
            metric: DistanceMetric::L2,
            index: IndexKind::Flat,
            delete_policy: DeletePolicy::Tombstone,
            train_iterations: 20,
        }
    }
}

impl Config {
    /// Create an in-memory configuration.
    ///
    /// Data will not be persisted and will be lost when the process exits.
    pub fn memory(embedding_model: impl Into<String>, dimension: usize) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dimension,
            ..Self::default()
        }
    }

    /// Create a persistent configuration.
    ///
    /// The snapshot pair is stored in `path` and loaded on open.
    pub fn persistent<P: Into<PathBuf>>(
        path: P,
        embedding_model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            data_path: Some(path.into()),
            ..Self::memory(embedding_model, dimension)
        }
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Set the index layout.
    pub fn with_index(mut self, index: IndexKind) -> Self {
        self.index = index;
        self
    }

    /// Set the deletion policy.
    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Set the number of k-means iterations for IVF training.
    pub fn with_train_iterations(mut self, iterations: usize) -> Self {
        self.train_iterations = iterations;
        self
    }

    /// Check the configuration for values no index can work with.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::Configuration("dimension must be positive".into()));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(Error::Configuration("embedding_model must not be empty".into()));
        }
        if let IndexKind::IvfFlat { nlist, nprobe } = self.index {
            if nlist == 0 || nprobe == 0 {
                return Err(Error::Configuration(
                    "nlist and nprobe must both be positive".into(),
                ));
            }
            if self.train_iterations == 0 {
                return Err(Error::Configuration(
                    "train_iterations must be positive for ivf_flat".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Index layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exact brute-force scan. Needs no training.
    #[default]
    Flat,

    /// Inverted file over k-means centroids.
    ///
    /// Trained once, on the first batch added. Recall for every later
    /// addition depends on how representative that batch was.
    IvfFlat {
        /// Number of inverted lists (centroids).
        nlist: usize,
        /// Number of lists scanned per query.
        nprobe: usize,
    },
}

impl IndexKind {
    /// Short name used in stats and on disk.
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::IvfFlat { .. } => "ivf_flat",
        }
    }

    /// Whether this layout must be trained before it can answer queries.
    pub fn requires_training(&self) -> bool {
        matches!(self, IndexKind::IvfFlat { .. })
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What `delete_by_document` does on an append-only index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Leave the index untouched and report the limitation with a warning.
    Report,

    /// Record the document's slots in a persisted tombstone set that `search`
    /// filters out; `rebuild` compacts them away.
    #[default]
    Tombstone,
}

impl std::str::FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "report" | "noop" | "no_op" => Ok(DeletePolicy::Report),
            "tombstone" => Ok(DeletePolicy::Tombstone),
            _ => Err(format!("Unknown delete policy: {}", s)),
        }
    }
}
