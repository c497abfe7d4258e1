//! Error types for docqa-vector.

use thiserror::Error;

/// Result type for docqa-vector operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in docqa-vector operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The number of vectors and metadata records passed to `add` differ.
    #[error("Batch size mismatch: {vectors} vectors but {metadata} metadata records")]
    BatchSizeMismatch {
        /// Number of vectors in the batch.
        vectors: usize,
        /// Number of metadata records in the batch.
        metadata: usize,
    },

    /// Dimension mismatch between a vector and the store.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions.
        expected: usize,
        /// Actual dimensions provided.
        actual: usize,
    },

    /// Invalid vector (e.g., contains NaN).
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// The persisted index/metadata pair could not be loaded.
    ///
    /// `VectorStore::open` recovers from this by starting an empty index.
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    /// Slot ids and metadata records are no longer positionally aligned.
    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// Persistence error (serialization, atomic promotion, etc.).
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
