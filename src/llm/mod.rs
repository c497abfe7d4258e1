//! Generation and embedding provider clients
//!
//! - [`GenerationProvider`] - the trait every text generation backend implements
//! - [`ollama::OllamaClient`] - generation against a local Ollama server
//! - [`ollama::OllamaEmbedder`] - the Ollama
//!   [`EmbeddingProvider`](crate::rag::embeddings::EmbeddingProvider)
//!
//! Enable providers via Cargo features:
//! - `ollama` - Local Ollama server (default)

/// Core generation trait and response types.
pub mod client;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use client::{Generation, GenerationProvider, TextStream, TokenUsage};
