//! Retrieval Augmented Generation (RAG) Pipeline
//!
//! # Module Structure
//!
//! - [`chunker`] - Text chunking with paragraph, section, sliding-window and semantic strategies
//! - [`embeddings`] - Embedding provider abstraction
//! - [`retrieval`] - Vector search with a similarity floor
//! - [`context`] - Numbered `[Source k]` context assembly
//! - [`citations`] - Mapping `[Source k]` markers back to chunks
//! - [`synthesizer`] - Question answering, blocking or streamed
//! - [`pipeline`] - The exposed indexing, search and QA operations
//!
//! # RAG Pipeline
//!
//! 1. **Ingestion** - Documents are chunked, rows written, chunks embedded
//! 2. **Storage** - Vectors appended to the store and bound to their rows
//! 3. **Retrieval** - Query embedded, similar chunks retrieved above a floor
//! 4. **Assembly** - Ranked chunks numbered as sources
//! 5. **Generation** - LLM answers from the context, citations extracted
//!
//! # Example
//!
//! ```ignore
//! use docqa::rag::pipeline::DocqaPipeline;
//! use docqa::types::{IndexRequest, QuestionRequest};
//! use docqa::utils::toml_config::DocqaConfig;
//!
//! let config = DocqaConfig::load(None)?;
//! let pipeline = DocqaPipeline::from_config(&config).await?;
//!
//! pipeline.index_document(IndexRequest {
//!     document_id: "note-1".into(),
//!     text: discharge_summary,
//!     chunking_strategy: Some("section".into()),
//! }).await?;
//!
//! let answer = pipeline.ask(QuestionRequest::new("What was the discharge dose?")).await?;
//! ```

pub mod chunker;
pub mod citations;
pub mod context;
pub mod embeddings;
pub mod pipeline;
pub mod retrieval;
pub mod synthesizer;
