//! Test doubles for the provider seams.
//!
//! Neither double touches the network, so pipeline tests run offline.

use async_trait::async_trait;
use docqa::llm::{Generation, GenerationProvider, TextStream, TokenUsage};
use docqa::rag::embeddings::{normalize, EmbeddingProvider};
use docqa::types::{AppError, Result};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const HASH_MODEL: &str = "hash";
pub const HASH_DIMENSION: usize = 256;

/// Generator with a canned answer that counts how often it was called.
///
/// # Examples
///
/// ```ignore
/// let generator = MockGenerator::new("Metformin 500 mg [Source 1].");
/// let failing = MockGenerator::failing();
/// ```
pub struct MockGenerator {
    response: String,
    should_fail: bool,
    calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            should_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// A generator whose provider is always unreachable.
    pub fn failing() -> Self {
        Self {
            response: String::new(),
            should_fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `generate` and `stream` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(AppError::ProviderUnavailable("Mock provider is down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl GenerationProvider for MockGenerator {
    async fn generate(&self, _system: &str, _prompt: &str) -> Result<Generation> {
        self.begin()?;
        Ok(Generation {
            text: self.response.clone(),
            usage: TokenUsage::new(10, 5),
            model: "mock-model".to_string(),
        })
    }

    async fn stream(&self, _system: &str, _prompt: &str) -> Result<TextStream> {
        self.begin()?;

        // Split response into chunks for streaming simulation
        let chunks: Vec<String> = self
            .response
            .chars()
            .collect::<Vec<_>>()
            .chunks(5)
            .map(|c| c.iter().collect())
            .collect();

        Ok(Box::new(stream::iter(chunks.into_iter().map(Ok)).boxed()))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase word is hashed into one of [`HASH_DIMENSION`] buckets and
/// the counts are normalized, so identical texts embed identically and texts
/// without shared words are nearly orthogonal.
#[derive(Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; HASH_DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[bucket(&word.to_lowercase())] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

/// FNV-1a.
fn bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % HASH_DIMENSION as u64) as usize
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        HASH_DIMENSION
    }

    fn model_name(&self) -> &str {
        HASH_MODEL
    }
}
