use chrono::{DateTime, Utc};
use docqa_vector::{DeleteOutcome, SlotId, TrainingReport};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::TokenUsage;
use crate::rag::chunker::ChunkingStrategy;
use crate::rag::citations::Citation;

// ============= API Request/Response Types =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub document_id: String,
    pub text: String,
    /// Strategy name; the configured default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunking_strategy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    pub document_id: String,
    pub strategy: ChunkingStrategy,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub chunk_ids: Vec<Uuid>,
    pub vector_ids: Vec<SlotId>,
    /// Present when this document trained the index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingReport>,
    pub timing: IndexTiming,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IndexTiming {
    pub chunking_ms: u64,
    pub embedding_ms: u64,
    pub indexing_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResultItem>,
    pub results_count: usize,
    pub timing: SearchTiming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub slot: SlotId,
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SearchTiming {
    pub embedding_ms: u64,
    pub search_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
    #[serde(default = "default_include_sources")]
    pub include_sources: bool,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f32>,
}

fn default_include_sources() -> bool {
    true
}

impl QuestionRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            include_sources: true,
            stream: false,
            top_k: None,
            min_similarity: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub query_id: Uuid,
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub chunks_retrieved: usize,
    pub has_answer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub retrieved_chunks: Vec<ChunkPreview>,
    pub timing: AnswerTiming,
}

/// Short view of one retrieved chunk, keyed by its source number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPreview {
    pub source: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub similarity: f32,
    pub preview: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AnswerTiming {
    pub retrieval_ms: u64,
    pub generation_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_vectors: usize,
    pub total_chunks: usize,
    pub total_documents: usize,
    pub tombstoned: usize,
    pub dimension: usize,
    pub index_type: String,
    pub metric: String,
    pub is_trained: bool,
    pub embedding_model: String,
    pub next_slot_id: SlotId,
    /// Chunk rows held by the repository.
    pub repository_chunks: usize,
    pub repository_documents: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub document_id: String,
    pub outcome: DeleteOutcome,
    pub chunk_rows_removed: usize,
}

// ============= Query Analytics =============

/// One search or question, as recorded for analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchLog {
    pub id: Uuid,
    pub query: String,
    pub top_k: usize,
    pub similarity_floor: f32,
    pub results_count: usize,
    pub top_similarity: Option<f32>,
    pub result_slots: Vec<SlotId>,
    pub embedding_ms: u64,
    pub search_ms: u64,
    pub created_at: DateTime<Utc>,
}

// ============= Error Types =============

/// How a failure should be surfaced to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The request itself was wrong.
    Client,
    /// An external capability was unreachable or failing.
    Unavailable,
    /// An invariant was violated inside the pipeline.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid chunking strategy: {0}")]
    InvalidStrategy(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Vector store error: {0}")]
    Vector(#[from] docqa_vector::Error),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::InvalidStrategy(_) | AppError::InvalidInput(_) => ErrorClass::Client,
            AppError::ProviderUnavailable(_) => ErrorClass::Unavailable,
            AppError::Vector(_)
            | AppError::Consistency(_)
            | AppError::Database(_)
            | AppError::Configuration(_)
            | AppError::Internal(_) => ErrorClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            AppError::InvalidStrategy("x".into()).class(),
            ErrorClass::Client
        );
        assert_eq!(
            AppError::ProviderUnavailable("down".into()).class(),
            ErrorClass::Unavailable
        );
        let mismatch = docqa_vector::Error::BatchSizeMismatch {
            vectors: 2,
            metadata: 1,
        };
        assert_eq!(AppError::from(mismatch).class(), ErrorClass::Internal);
        assert_eq!(
            AppError::Database("locked".into()).class(),
            ErrorClass::Internal
        );
    }

    #[test]
    fn test_question_request_defaults() {
        let request: QuestionRequest =
            serde_json::from_str(r#"{"question": "What dose?"}"#).unwrap();
        assert!(request.include_sources);
        assert!(!request.stream);
        assert!(request.top_k.is_none());
    }
}
