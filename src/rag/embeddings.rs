//! Embedding provider abstraction.
//!
//! Vectors are expected to be L2-normalized so that a dot product equals
//! cosine similarity. [`check_dimension`] guards the store against vectors of
//! the wrong width before they reach it.

use async_trait::async_trait;
use tracing::error;

use crate::types::{AppError, Result};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::ProviderUnavailable("Embedding provider returned no vector".into()))
    }

    /// Embed many texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Width of every returned vector.
    fn dimension(&self) -> usize;

    /// Identifier of the embedding space.
    fn model_name(&self) -> &str;
}

/// Scale `vector` to unit length. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Reject a vector whose width differs from the configured dimension.
pub fn check_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        error!(expected, actual = vector.len(), "Embedding has wrong dimension");
        return Err(AppError::Vector(docqa_vector::Error::DimensionMismatch {
            expected,
            actual: vector.len(),
        }));
    }
    Ok(())
}
