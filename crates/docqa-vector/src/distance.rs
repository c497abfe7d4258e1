//! Distance metrics for vector similarity.
//!
//! Every metric exposes a native distance (lower is closer) and a similarity
//! transform into `[0, 1]` that decreases monotonically with distance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Distance metric used by an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    ///
    /// Similarity is `1 / (1 + d)`, so identical vectors score 1.0.
    #[default]
    L2,

    /// Inner product, for embeddings normalized to unit length.
    ///
    /// Native distance is `-ip`; similarity is `(1 + ip) / 2` clamped to `[0, 1]`.
    InnerProduct,
}

impl DistanceMetric {
    /// Compute the native distance between two vectors (lower is closer).
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

        match self {
            DistanceMetric::L2 => squared_l2(a, b),
            DistanceMetric::InnerProduct => -dot_product(a, b),
        }
    }

    /// Transform a native distance into a similarity score in `[0, 1]`.
    #[inline]
    pub fn to_similarity(&self, distance: f32) -> f32 {
        match self {
            DistanceMetric::L2 => 1.0 / (1.0 + distance.max(0.0)),
            DistanceMetric::InnerProduct => ((1.0 - distance) / 2.0).clamp(0.0, 1.0),
        }
    }

    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "l2" | "euclidean" | "squared_l2" => Ok(DistanceMetric::L2),
            "inner_product" | "ip" | "dot" | "dot_product" => Ok(DistanceMetric::InnerProduct),
            _ => Err(format!("Unknown distance metric: {}", s)),
        }
    }
}

/// Squared Euclidean distance, unrolled by four.
#[inline]
pub(crate) fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;

    let chunks = a.len() / 4;
    let remainder = a.len() % 4;

    for i in 0..chunks {
        let base = i * 4;
        let d0 = a[base] - b[base];
        let d1 = a[base + 1] - b[base + 1];
        let d2 = a[base + 2] - b[base + 2];
        let d3 = a[base + 3] - b[base + 3];
        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3;
    }

    let start = chunks * 4;
    for i in 0..remainder {
        let idx = start + i;
        let d = a[idx] - b[idx];
        sum += d * d;
    }

    sum
}

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;

    let chunks = a.len() / 4;
    let remainder = a.len() % 4;

    for i in 0..chunks {
        let base = i * 4;
        sum += a[base] * b[base]
            + a[base + 1] * b[base + 1]
            + a[base + 2] * b[base + 2]
            + a[base + 3] * b[base + 3];
    }

    let start = chunks * 4;
    for i in 0..remainder {
        let idx = start + i;
        sum += a[idx] * b[idx];
    }

    sum
}
