//! # docqa - clinical document question answering
//!
//! A semantic retrieval pipeline: chunk clinical text, index it for similarity
//! search, and answer questions with citations back to the indexed chunks.
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use docqa::{DocqaConfig, DocqaPipeline, QuestionRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DocqaConfig::load(None)?;
//!     let pipeline = DocqaPipeline::from_config(&config).await?;
//!
//!     let response = pipeline.ask(QuestionRequest::new("Any drug allergies?")).await?;
//!     println!("{}", response.answer);
//!     for citation in response.citations {
//!         println!("  [{}] {}", citation.source_id, citation.document_id);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama embeddings and generation over HTTP (default) |
//!
//! ## Modules
//!
//! - [`rag`] - Chunking, retrieval, context assembly, answer synthesis and the pipeline
//! - [`llm`] - Generation provider abstraction and clients
//! - [`db`] - Chunk rows and query analytics
//! - [`utils`] - Layered configuration and tracing setup
//! - [`types`] - Request/response types and errors
//! - [`cli`] - Command-line interface
//!
//! The vector index itself lives in the `docqa-vector` crate.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Command-line parsing and terminal output.
pub mod cli;
/// Chunk rows and query analytics.
pub mod db;
/// Generation provider clients and abstractions.
pub mod llm;
/// Retrieval Augmented Generation (RAG) components.
pub mod rag;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration and logging utilities.
pub mod utils;

// Re-export commonly used types
pub use db::{ChunkRepository, InMemoryChunkRepository, TursoChunkRepository};
pub use docqa_vector::VectorStore;
pub use llm::{GenerationProvider, TokenUsage};
pub use rag::chunker::{Chunker, ChunkingStrategy};
pub use rag::embeddings::EmbeddingProvider;
pub use rag::pipeline::{DocqaPipeline, PipelineAnswer};
pub use rag::synthesizer::{AnswerAccumulator, AnswerEvent};
pub use types::{
    AppError, IndexRequest, QuestionRequest, QuestionResponse, Result, SearchRequest,
};
pub use utils::toml_config::DocqaConfig;
