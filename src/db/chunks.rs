//! Chunk rows and query analytics.
//!
//! The repository holds one row per chunk. Rows are written before their
//! vectors reach the store and receive their slot id afterwards, so a row
//! without a slot means the vector add did not complete.

use std::collections::{BTreeMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docqa_vector::SlotId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rag::chunker::ChunkingStrategy;
use crate::types::{AppError, Result, SearchLog};

/// One stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub strategy: ChunkingStrategy,
    pub start: usize,
    pub end: usize,
    /// Embedding space the chunk's vector belongs to.
    pub embedding_model: String,
    /// Vector slot, assigned once the vector has been added.
    pub slot: Option<SlotId>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Insert rows for one document.
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<()>;

    /// Bind each row to its vector slot. `ids` and `slots` pair up by position.
    async fn assign_slots(&self, ids: &[Uuid], slots: &[SlotId]) -> Result<()>;

    /// Remove specific rows. Returns how many existed.
    async fn remove_chunks(&self, ids: &[Uuid]) -> Result<usize>;

    /// Rows of a document ordered by chunk index.
    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>>;

    /// Remove every row of a document. Returns how many were removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    async fn chunk_count(&self) -> Result<usize>;

    async fn document_count(&self) -> Result<usize>;

    async fn record_search(&self, log: SearchLog) -> Result<()>;

    /// Most recent search logs first.
    async fn search_logs(&self, limit: usize) -> Result<Vec<SearchLog>>;
}

/// Search logs kept by [`InMemoryChunkRepository`]; older entries are dropped.
pub const MAX_IN_MEMORY_LOGS: usize = 1_000;

/// Process-local repository. Rows are lost when the process exits.
#[derive(Default)]
pub struct InMemoryChunkRepository {
    chunks: RwLock<BTreeMap<Uuid, ChunkRecord>>,
    logs: RwLock<VecDeque<SearchLog>>,
}

impl InMemoryChunkRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkRepository for InMemoryChunkRepository {
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<()> {
        let mut rows = self.chunks.write();
        if let Some(dup) = chunks.iter().find(|c| rows.contains_key(&c.id)) {
            return Err(AppError::Consistency(format!(
                "Chunk {} already exists",
                dup.id
            )));
        }
        for chunk in chunks {
            rows.insert(chunk.id, chunk);
        }
        Ok(())
    }

    async fn assign_slots(&self, ids: &[Uuid], slots: &[SlotId]) -> Result<()> {
        if ids.len() != slots.len() {
            return Err(AppError::Consistency(format!(
                "{} slots returned for {} chunk rows",
                slots.len(),
                ids.len()
            )));
        }

        let mut rows = self.chunks.write();
        if let Some(missing) = ids.iter().find(|id| !rows.contains_key(*id)) {
            return Err(AppError::Consistency(format!(
                "Chunk row {} missing while assigning slots",
                missing
            )));
        }
        for (id, slot) in ids.iter().zip(slots) {
            if let Some(row) = rows.get_mut(id) {
                row.slot = Some(*slot);
            }
        }
        Ok(())
    }

    async fn remove_chunks(&self, ids: &[Uuid]) -> Result<usize> {
        let mut rows = self.chunks.write();
        Ok(ids.iter().filter(|id| rows.remove(*id).is_some()).count())
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let mut found: Vec<ChunkRecord> = self
            .chunks
            .read()
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.chunk_index);
        Ok(found)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut rows = self.chunks.write();
        let before = rows.len();
        rows.retain(|_, c| c.document_id != document_id);
        Ok(before - rows.len())
    }

    async fn chunk_count(&self) -> Result<usize> {
        Ok(self.chunks.read().len())
    }

    async fn document_count(&self) -> Result<usize> {
        let rows = self.chunks.read();
        let documents: HashSet<&str> = rows.values().map(|c| c.document_id.as_str()).collect();
        Ok(documents.len())
    }

    async fn record_search(&self, log: SearchLog) -> Result<()> {
        let mut logs = self.logs.write();
        if logs.len() == MAX_IN_MEMORY_LOGS {
            logs.pop_front();
        }
        logs.push_back(log);
        Ok(())
    }

    async fn search_logs(&self, limit: usize) -> Result<Vec<SearchLog>> {
        Ok(self.logs.read().iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(document_id: &str, chunk_index: usize) -> ChunkRecord {
        ChunkRecord {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            chunk_index,
            text: format!("chunk {}", chunk_index),
            strategy: ChunkingStrategy::Paragraph,
            start: 0,
            end: 7,
            embedding_model: "test".into(),
            slot: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_assign() {
        let repo = InMemoryChunkRepository::new();
        let rows = vec![record("a", 1), record("a", 0), record("b", 0)];
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        repo.insert_chunks(rows).await.unwrap();

        repo.assign_slots(&ids, &[7, 8, 9]).await.unwrap();
        let doc = repo.chunks_for_document("a").await.unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc[0].chunk_index, 0);
        assert_eq!(doc[0].slot, Some(8));
        assert_eq!(repo.document_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_slot_count_mismatch_is_consistency_error() {
        let repo = InMemoryChunkRepository::new();
        let row = record("a", 0);
        let ids = vec![row.id];
        repo.insert_chunks(vec![row]).await.unwrap();

        let err = repo.assign_slots(&ids, &[1, 2]).await.unwrap_err();
        assert!(matches!(err, AppError::Consistency(_)));
    }

    #[tokio::test]
    async fn test_delete_document() {
        let repo = InMemoryChunkRepository::new();
        repo.insert_chunks(vec![record("a", 0), record("a", 1), record("b", 0)])
            .await
            .unwrap();
        assert_eq!(repo.delete_document("a").await.unwrap(), 2);
        assert_eq!(repo.chunk_count().await.unwrap(), 1);
        assert_eq!(repo.delete_document("missing").await.unwrap(), 0);
    }

    fn log(query: &str) -> SearchLog {
        SearchLog {
            id: Uuid::new_v4(),
            query: query.into(),
            top_k: 5,
            similarity_floor: 0.7,
            results_count: 0,
            top_similarity: None,
            result_slots: Vec::new(),
            embedding_ms: 1,
            search_ms: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_search_logs_are_bounded() {
        let repo = InMemoryChunkRepository::new();
        for i in 0..MAX_IN_MEMORY_LOGS + 5 {
            repo.record_search(log(&format!("q{}", i))).await.unwrap();
        }
        let logs = repo.search_logs(usize::MAX).await.unwrap();
        assert_eq!(logs.len(), MAX_IN_MEMORY_LOGS);
        assert_eq!(logs[0].query, format!("q{}", MAX_IN_MEMORY_LOGS + 4));
        assert_eq!(logs.last().unwrap().query, "q5");
    }

    #[tokio::test]
    async fn test_search_logs_newest_first() {
        let repo = InMemoryChunkRepository::new();
        for query in ["first", "second"] {
            repo.record_search(SearchLog {
                id: Uuid::new_v4(),
                query: query.into(),
                top_k: 5,
                similarity_floor: 0.7,
                results_count: 0,
                top_similarity: None,
                result_slots: Vec::new(),
                embedding_ms: 1,
                search_ms: 1,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let logs = repo.search_logs(1).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].query, "second");
    }
}
