//! The exposed document QA pipeline.
//!
//! [`DocqaPipeline`] is built once from explicitly constructed collaborators
//! and shared by handle. It keeps the three id spaces in step:
//!
//! - chunk rows in the [`ChunkRepository`], written before their vectors
//! - vector slots in the [`VectorStore`], assigned by `add`
//! - source numbers, scoped to one answer and produced by the context assembler

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use docqa_vector::{DeleteOutcome, RebuildReport, SlotId, SlotMetadata, VectorStore};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::{ChunkRecord, ChunkRepository};
use crate::llm::GenerationProvider;
use crate::rag::chunker::{Chunker, ChunkingStrategy};
use crate::rag::embeddings::{check_dimension, EmbeddingProvider};
use crate::rag::retrieval::RetrievalCoordinator;
use crate::rag::synthesizer::{AnswerStream, AnswerSynthesizer};
use crate::types::{
    AnswerTiming, AppError, ChunkPreview, DeleteResponse, IndexRequest, IndexResponse,
    IndexTiming, QuestionRequest, QuestionResponse, Result, SearchLog, SearchRequest,
    SearchResponse, SearchResultItem, SearchTiming, StatsResponse,
};
use crate::utils::logging::ANALYTICS_TARGET;
use crate::utils::toml_config::{ChunkingConfig, DocqaConfig, RetrievalConfig};

/// Characters kept in a retrieved-chunk preview.
const PREVIEW_CHARS: usize = 200;

/// Result of [`DocqaPipeline::respond`].
pub enum PipelineAnswer {
    Complete(QuestionResponse),
    Stream(AnswerStream),
}

pub struct DocqaPipeline {
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: VectorStore,
    repository: Arc<dyn ChunkRepository>,
    synthesizer: AnswerSynthesizer,
}

impl DocqaPipeline {
    /// Assemble a pipeline from its collaborators.
    ///
    /// The embedder must produce vectors of the store's model and dimension.
    pub fn new(
        config: &DocqaConfig,
        store: VectorStore,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        repository: Arc<dyn ChunkRepository>,
    ) -> Result<Self> {
        let store_config = store.config();
        if embedder.dimension() != store_config.dimension {
            return Err(AppError::Configuration(format!(
                "Embedder produces {}-dimensional vectors but the index holds {}",
                embedder.dimension(),
                store_config.dimension
            )));
        }
        if embedder.model_name() != store_config.embedding_model {
            return Err(AppError::Configuration(format!(
                "Embedder model '{}' does not match index model '{}'",
                embedder.model_name(),
                store_config.embedding_model
            )));
        }

        let chunker = Chunker::new(config.chunking.chunker_config())?;
        let synthesizer = AnswerSynthesizer::new(
            RetrievalCoordinator::new(store.clone()),
            generator,
            config.prompts.clone(),
        )?;

        Ok(Self {
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
            chunker,
            embedder,
            store,
            repository,
            synthesizer,
        })
    }

    /// Build the default local stack: a persistent store under
    /// `config.index_dir()`, Ollama for embeddings and generation, and a
    /// libSQL chunk repository at `config.database_path()`.
    #[cfg(feature = "ollama")]
    pub async fn from_config(config: &DocqaConfig) -> Result<Self> {
        use crate::db::TursoChunkRepository;
        use crate::llm::ollama::{OllamaClient, OllamaEmbedder};
        use std::time::Duration;

        let store = VectorStore::open(config.vector_store_config()).await?;
        let repository = TursoChunkRepository::new_local(config.database_path()).await?;

        let embedding = &config.embedding;
        let embedder = OllamaEmbedder::new(&embedding.base_url, &embedding.model, embedding.dimension)?
            .with_batch_size(embedding.batch_size)
            .with_max_input_chars(embedding.max_input_chars)
            .with_timeout(Duration::from_secs(embedding.timeout_secs));

        let generation = &config.generation;
        let generator = OllamaClient::new(&generation.base_url, &generation.model)?
            .with_temperature(generation.temperature)
            .with_max_tokens(generation.max_tokens)
            .with_timeout(Duration::from_secs(generation.timeout_secs));

        Self::new(
            config,
            store,
            Arc::new(embedder),
            Arc::new(generator),
            Arc::new(repository),
        )
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn repository(&self) -> &Arc<dyn ChunkRepository> {
        &self.repository
    }

    pub fn synthesizer(&self) -> &AnswerSynthesizer {
        &self.synthesizer
    }

    // ============= Indexing =============

    /// Chunk, embed and index one document.
    #[instrument(skip(self, request), fields(document_id = %request.document_id, chars = request.text.len()))]
    pub async fn index_document(&self, request: IndexRequest) -> Result<IndexResponse> {
        let started = Instant::now();

        if request.document_id.trim().is_empty() {
            return Err(AppError::InvalidInput("document_id must not be empty".into()));
        }
        if request.text.trim().is_empty() {
            return Err(AppError::InvalidInput("document text must not be empty".into()));
        }
        let strategy = match request.chunking_strategy.as_deref() {
            Some(name) => name.parse::<ChunkingStrategy>()?,
            None => self.chunking.strategy,
        };

        let chunks = self.chunker.chunk(&request.text, strategy);
        let chunking_ms = started.elapsed().as_millis() as u64;
        if chunks.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "{} chunking produced no chunks of at least {} characters",
                strategy, self.chunking.min_chunk_size
            )));
        }

        let embed_started = Instant::now();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        for vector in &vectors {
            check_dimension(vector, self.store.config().dimension)?;
        }
        let embedding_ms = embed_started.elapsed().as_millis() as u64;

        let index_started = Instant::now();
        let model = self.embedder.model_name().to_string();
        let created_at = Utc::now();
        let records: Vec<ChunkRecord> = chunks
            .iter()
            .map(|chunk| ChunkRecord {
                id: Uuid::new_v4(),
                document_id: request.document_id.clone(),
                chunk_index: chunk.index,
                text: chunk.text.clone(),
                strategy: chunk.strategy,
                start: chunk.start,
                end: chunk.end,
                embedding_model: model.clone(),
                slot: None,
                created_at,
            })
            .collect();
        let chunk_ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let metadata: Vec<SlotMetadata> = records
            .iter()
            .map(|r| SlotMetadata {
                chunk_id: r.id.to_string(),
                document_id: r.document_id.clone(),
                chunk_index: r.chunk_index,
                text: r.text.clone(),
            })
            .collect();

        // Rows first, so no vector ever exists without its row.
        self.repository.insert_chunks(records).await?;

        let report = match self.store.add(vectors, metadata).await {
            Ok(report) => report,
            Err(e) => {
                if let Err(cleanup) = self.repository.remove_chunks(&chunk_ids).await {
                    warn!(error = %cleanup, "Failed to remove chunk rows after a failed add");
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self.repository.assign_slots(&chunk_ids, &report.slot_ids).await {
            error!(
                error = %e,
                rows = chunk_ids.len(),
                slots = report.slot_ids.len(),
                "Chunk rows and vector slots are out of step"
            );
            return Err(e);
        }
        let indexing_ms = index_started.elapsed().as_millis() as u64;

        if let Some(training) = &report.training {
            if training.is_degraded() {
                warn!(
                    lists = training.lists,
                    requested = training.requested_lists,
                    "Index trained on a small first batch; recall may stay degraded"
                );
            }
        }

        let timing = IndexTiming {
            chunking_ms,
            embedding_ms,
            indexing_ms,
            total_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            document_id = %request.document_id,
            strategy = %strategy,
            chunks = chunks.len(),
            total_ms = timing.total_ms,
            "Indexed document"
        );

        Ok(IndexResponse {
            document_id: request.document_id,
            strategy,
            chunks_created: chunks.len(),
            embeddings_generated: report.slot_ids.len(),
            chunk_ids,
            vector_ids: report.slot_ids,
            training: report.training,
            timing,
        })
    }

    // ============= Search =============

    #[instrument(skip(self, request))]
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        self.validate_query(&request.query)?;

        let top_k = request.top_k.unwrap_or(self.retrieval.search_top_k);
        if top_k == 0 {
            return Err(AppError::InvalidInput("top_k must be positive".into()));
        }
        let floor = request
            .similarity_threshold
            .unwrap_or(self.retrieval.search_similarity_threshold);

        let (query_vector, embedding_ms) = self.embed_query(&request.query).await?;

        let search_started = Instant::now();
        let hits = self
            .synthesizer
            .retrieval()
            .retrieve(query_vector, top_k, floor)
            .await?;
        let search_ms = search_started.elapsed().as_millis() as u64;

        let scored: Vec<(SlotId, f32)> = hits.iter().map(|h| (h.slot, h.similarity)).collect();
        self.record_query(
            Uuid::new_v4(),
            &request.query,
            (top_k, floor),
            &scored,
            (embedding_ms, search_ms),
        )
        .await;

        let results: Vec<SearchResultItem> = hits
            .into_iter()
            .map(|hit| SearchResultItem {
                slot: hit.slot,
                chunk_id: hit.metadata.chunk_id,
                document_id: hit.metadata.document_id,
                chunk_index: hit.metadata.chunk_index,
                text: hit.metadata.text,
                similarity: hit.similarity,
            })
            .collect();

        Ok(SearchResponse {
            query: request.query,
            results_count: results.len(),
            results,
            timing: SearchTiming {
                embedding_ms,
                search_ms,
                total_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    // ============= Question Answering =============

    /// Answer a question with a single generation call.
    #[instrument(skip(self, request))]
    pub async fn ask(&self, request: QuestionRequest) -> Result<QuestionResponse> {
        let started = Instant::now();
        let query_id = Uuid::new_v4();
        let (top_k, floor) = self.question_params(&request)?;

        let (query_vector, embedding_ms) = self.embed_query(&request.question).await?;
        let answer = self
            .synthesizer
            .answer(&request.question, query_vector, top_k, floor, request.include_sources)
            .await?;

        let scored: Vec<(SlotId, f32)> = answer
            .context
            .sources
            .iter()
            .map(|s| (s.slot, s.similarity))
            .collect();
        self.record_query(
            query_id,
            &request.question,
            (top_k, floor),
            &scored,
            (embedding_ms, answer.retrieval_ms),
        )
        .await;

        let retrieved_chunks = answer
            .context
            .sources
            .iter()
            .map(|s| ChunkPreview {
                source: s.source,
                chunk_id: s.chunk_id.clone(),
                document_id: s.document_id.clone(),
                similarity: s.similarity,
                preview: preview(&s.text),
            })
            .collect();

        Ok(QuestionResponse {
            query_id,
            question: request.question,
            answer: answer.answer,
            citations: answer.citations,
            chunks_retrieved: answer.context.len(),
            has_answer: answer.has_answer,
            tokens_used: answer.usage,
            model: answer.model,
            retrieved_chunks,
            timing: AnswerTiming {
                retrieval_ms: embedding_ms + answer.retrieval_ms,
                generation_ms: answer.generation_ms,
                total_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Answer a question as a stream of [`AnswerEvent`](crate::rag::synthesizer::AnswerEvent)s.
    #[instrument(skip(self, request))]
    pub async fn ask_stream(&self, request: QuestionRequest) -> Result<AnswerStream> {
        let (top_k, floor) = self.question_params(&request)?;
        let (query_vector, _) = self.embed_query(&request.question).await?;
        self.synthesizer
            .answer_stream(&request.question, query_vector, top_k, floor)
            .await
    }

    /// Dispatch on `request.stream`.
    pub async fn respond(&self, request: QuestionRequest) -> Result<PipelineAnswer> {
        if request.stream {
            Ok(PipelineAnswer::Stream(self.ask_stream(request).await?))
        } else {
            Ok(PipelineAnswer::Complete(self.ask(request).await?))
        }
    }

    // ============= Maintenance =============

    pub async fn stats(&self) -> Result<StatsResponse> {
        let stats = self.store.stats();
        Ok(StatsResponse {
            total_vectors: stats.total_vectors,
            total_chunks: stats.live_chunks,
            total_documents: stats.documents,
            tombstoned: stats.tombstoned,
            dimension: stats.dimension,
            index_type: stats.index_type,
            metric: stats.metric,
            is_trained: stats.state.is_trained(),
            embedding_model: stats.embedding_model,
            next_slot_id: stats.next_id,
            repository_chunks: self.repository.chunk_count().await?,
            repository_documents: self.repository.document_count().await?,
        })
    }

    /// Remove a document according to the store's delete policy.
    ///
    /// Chunk rows are only removed when the store actually hid the vectors.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, document_id: &str) -> Result<DeleteResponse> {
        if document_id.trim().is_empty() {
            return Err(AppError::InvalidInput("document_id must not be empty".into()));
        }

        let outcome = self.store.delete_by_document(document_id).await?;
        let chunk_rows_removed = match &outcome {
            DeleteOutcome::Tombstoned { .. } => {
                self.repository.delete_document(document_id).await?
            }
            DeleteOutcome::Unsupported { .. } => 0,
        };

        Ok(DeleteResponse {
            document_id: document_id.to_string(),
            outcome,
            chunk_rows_removed,
        })
    }

    /// Compact tombstoned vectors out of the index.
    pub async fn rebuild_index(&self) -> Result<RebuildReport> {
        Ok(self.store.rebuild().await?)
    }

    /// Pick up a snapshot committed by another process.
    pub async fn reload_index(&self) -> Result<bool> {
        Ok(self.store.reload().await?)
    }

    // ============= Helpers =============

    fn validate_query(&self, query: &str) -> Result<()> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput("query must not be empty".into()));
        }
        let chars = query.chars().count();
        if chars > self.retrieval.max_query_length {
            return Err(AppError::InvalidInput(format!(
                "query is {} characters, the limit is {}",
                chars, self.retrieval.max_query_length
            )));
        }
        Ok(())
    }

    fn question_params(&self, request: &QuestionRequest) -> Result<(usize, f32)> {
        self.validate_query(&request.question)?;
        let top_k = request.top_k.unwrap_or(self.retrieval.qa_top_k);
        if top_k == 0 {
            return Err(AppError::InvalidInput("top_k must be positive".into()));
        }
        let floor = request.min_similarity.unwrap_or(self.retrieval.qa_min_similarity);
        Ok((top_k, floor))
    }

    async fn embed_query(&self, text: &str) -> Result<(Vec<f32>, u64)> {
        let started = Instant::now();
        let vector = self.embedder.embed(text).await?;
        check_dimension(&vector, self.store.config().dimension)?;
        Ok((vector, started.elapsed().as_millis() as u64))
    }

    /// Emit the analytics event and keep a log row. Never fails the request.
    ///
    /// `scored` holds `(slot, similarity)` in rank order.
    async fn record_query(
        &self,
        id: Uuid,
        query: &str,
        (top_k, floor): (usize, f32),
        scored: &[(SlotId, f32)],
        (embedding_ms, search_ms): (u64, u64),
    ) {
        let top_similarity = scored.first().map(|(_, s)| *s);
        info!(
            target: ANALYTICS_TARGET,
            query_id = %id,
            query,
            top_k,
            floor,
            results = scored.len(),
            top_similarity,
            embedding_ms,
            search_ms,
            "query"
        );

        let log = SearchLog {
            id,
            query: query.to_string(),
            top_k,
            similarity_floor: floor,
            results_count: scored.len(),
            top_similarity,
            result_slots: scored.iter().map(|(slot, _)| *slot).collect(),
            embedding_ms,
            search_ms,
            created_at: Utc::now(),
        };
        if let Err(e) = self.repository.record_search(log).await {
            warn!(error = %e, "Failed to record search log");
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut short: String = text.chars().take(PREVIEW_CHARS).collect();
    short.push_str("...");
    short
}
