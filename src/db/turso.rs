//! libSQL-backed chunk repository.
//!
//! Rows live in a local database file next to the vector snapshots so that
//! reopening an index directory brings back the chunk rows and the search
//! history along with the vectors.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docqa_vector::SlotId;
use libsql::{params, Builder, Connection, Database, Row};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::db::chunks::{ChunkRecord, ChunkRepository};
use crate::rag::chunker::ChunkingStrategy;
use crate::types::{AppError, Result, SearchLog};

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, text, strategy, start_offset, \
                             end_offset, embedding_model, slot, created_at";

pub struct TursoChunkRepository {
    // Kept alive for the lifetime of the connection.
    _db: Database,
    // One connection for every statement: an in-memory database is private
    // to the connection that opened it, and transactions must not interleave.
    conn: Mutex<Connection>,
}

fn db_err(context: &str) -> impl Fn(libsql::Error) -> AppError + '_ {
    move |e| AppError::Database(format!("{}: {}", context, e))
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

impl TursoChunkRepository {
    /// Open (or create) a database file.
    pub async fn new_local(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::Database(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to open database {}: {}", path.display(), e))
            })?;
        Self::from_database(db).await
    }

    /// Private in-memory database, gone when the repository is dropped.
    pub async fn new_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(db_err("Failed to open in-memory database"))?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(db_err("Failed to get connection"))?;
        let repo = Self {
            _db: db,
            conn: Mutex::new(conn),
        };
        repo.initialize_schema().await?;
        Ok(repo)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS document_chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                strategy TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                embedding_model TEXT NOT NULL,
                slot INTEGER,
                created_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create document_chunks table"))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_document_chunks_document
                ON document_chunks(document_id)",
            (),
        )
        .await
        .map_err(db_err("Failed to create document_chunks index"))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS search_logs (
                id TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                top_k INTEGER NOT NULL,
                similarity_floor REAL NOT NULL,
                results_count INTEGER NOT NULL,
                top_similarity REAL,
                result_slots TEXT NOT NULL,
                embedding_ms INTEGER NOT NULL,
                search_ms INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create search_logs table"))?;

        Ok(())
    }
}

fn chunk_from_row(row: &Row) -> Result<ChunkRecord> {
    let get_err = |e: libsql::Error| AppError::Database(e.to_string());

    let id: String = row.get(0).map_err(get_err)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| AppError::Database(format!("Invalid chunk id {}: {}", id, e)))?;
    let strategy: String = row.get(4).map_err(get_err)?;
    let slot: Option<i64> = row.get(8).map_err(get_err)?;

    Ok(ChunkRecord {
        id,
        document_id: row.get(1).map_err(get_err)?,
        chunk_index: row.get::<i64>(2).map_err(get_err)? as usize,
        text: row.get(3).map_err(get_err)?,
        strategy: strategy.parse::<ChunkingStrategy>()?,
        start: row.get::<i64>(5).map_err(get_err)? as usize,
        end: row.get::<i64>(6).map_err(get_err)? as usize,
        embedding_model: row.get(7).map_err(get_err)?,
        slot: slot.map(|s| s as SlotId),
        created_at: from_millis(row.get::<i64>(9).map_err(get_err)?),
    })
}

fn log_from_row(row: &Row) -> Result<SearchLog> {
    let get_err = |e: libsql::Error| AppError::Database(e.to_string());

    let id: String = row.get(0).map_err(get_err)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| AppError::Database(format!("Invalid search log id {}: {}", id, e)))?;
    let slots: String = row.get(6).map_err(get_err)?;
    let result_slots: Vec<SlotId> = serde_json::from_str(&slots)
        .map_err(|e| AppError::Database(format!("Invalid result slots for {}: {}", id, e)))?;
    let top_similarity: Option<f64> = row.get(5).map_err(get_err)?;

    Ok(SearchLog {
        id,
        query: row.get(1).map_err(get_err)?,
        top_k: row.get::<i64>(2).map_err(get_err)? as usize,
        similarity_floor: row.get::<f64>(3).map_err(get_err)? as f32,
        results_count: row.get::<i64>(4).map_err(get_err)? as usize,
        top_similarity: top_similarity.map(|s| s as f32),
        result_slots,
        embedding_ms: row.get::<i64>(7).map_err(get_err)? as u64,
        search_ms: row.get::<i64>(8).map_err(get_err)? as u64,
        created_at: from_millis(row.get::<i64>(9).map_err(get_err)?),
    })
}

async fn count(conn: &Connection, sql: &str) -> Result<usize> {
    let mut rows = conn.query(sql, ()).await.map_err(db_err("Count failed"))?;
    match rows.next().await.map_err(db_err("Count failed"))? {
        Some(row) => Ok(row.get::<i64>(0).map_err(db_err("Count failed"))? as usize),
        None => Ok(0),
    }
}

#[async_trait]
impl ChunkRepository for TursoChunkRepository {
    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<()> {
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        for chunk in &chunks {
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO document_chunks
                        (id, document_id, chunk_index, text, strategy, start_offset,
                         end_offset, embedding_model, slot, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        chunk.id.to_string(),
                        chunk.document_id.clone(),
                        chunk.chunk_index as i64,
                        chunk.text.clone(),
                        chunk.strategy.name(),
                        chunk.start as i64,
                        chunk.end as i64,
                        chunk.embedding_model.clone(),
                        chunk.slot.map(|s| s as i64),
                        to_millis(chunk.created_at),
                    ],
                )
                .await
                .map_err(db_err("Failed to insert chunk"))?;

            if inserted == 0 {
                tx.rollback()
                    .await
                    .map_err(db_err("Failed to roll back"))?;
                return Err(AppError::Consistency(format!(
                    "Chunk {} already exists",
                    chunk.id
                )));
            }
        }

        tx.commit().await.map_err(db_err("Failed to commit chunks"))?;
        debug!(count = chunks.len(), "Inserted chunk rows");
        Ok(())
    }

    #[instrument(skip(self, ids, slots), fields(count = ids.len()))]
    async fn assign_slots(&self, ids: &[Uuid], slots: &[SlotId]) -> Result<()> {
        if ids.len() != slots.len() {
            return Err(AppError::Consistency(format!(
                "{} slots returned for {} chunk rows",
                slots.len(),
                ids.len()
            )));
        }

        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        for (id, slot) in ids.iter().zip(slots) {
            let updated = tx
                .execute(
                    "UPDATE document_chunks SET slot = ?1 WHERE id = ?2",
                    params![*slot as i64, id.to_string()],
                )
                .await
                .map_err(db_err("Failed to assign slot"))?;

            if updated == 0 {
                tx.rollback()
                    .await
                    .map_err(db_err("Failed to roll back"))?;
                return Err(AppError::Consistency(format!(
                    "Chunk row {} missing while assigning slots",
                    id
                )));
            }
        }

        tx.commit().await.map_err(db_err("Failed to commit slots"))?;
        Ok(())
    }

    async fn remove_chunks(&self, ids: &[Uuid]) -> Result<usize> {
        let conn = self.conn.lock().await;
        let mut removed = 0;
        for id in ids {
            removed += conn
                .execute(
                    "DELETE FROM document_chunks WHERE id = ?1",
                    [id.to_string()],
                )
                .await
                .map_err(db_err("Failed to remove chunk"))? as usize;
        }
        Ok(removed)
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM document_chunks WHERE document_id = ?1 ORDER BY chunk_index",
            CHUNK_COLUMNS
        );
        let mut rows = conn
            .query(&sql, [document_id])
            .await
            .map_err(db_err("Failed to query chunks"))?;

        let mut chunks = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err("Failed to read chunk"))? {
            chunks.push(chunk_from_row(&row)?);
        }
        Ok(chunks)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM document_chunks WHERE document_id = ?1",
                [document_id],
            )
            .await
            .map_err(db_err("Failed to delete document rows"))?;
        Ok(removed as usize)
    }

    async fn chunk_count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        count(&conn, "SELECT COUNT(*) FROM document_chunks").await
    }

    async fn document_count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        count(&conn, "SELECT COUNT(DISTINCT document_id) FROM document_chunks").await
    }

    async fn record_search(&self, log: SearchLog) -> Result<()> {
        let slots = serde_json::to_string(&log.result_slots)
            .map_err(|e| AppError::Internal(format!("Failed to encode result slots: {}", e)))?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO search_logs
                (id, query, top_k, similarity_floor, results_count, top_similarity,
                 result_slots, embedding_ms, search_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                log.id.to_string(),
                log.query,
                log.top_k as i64,
                log.similarity_floor as f64,
                log.results_count as i64,
                log.top_similarity.map(|s| s as f64),
                slots,
                log.embedding_ms as i64,
                log.search_ms as i64,
                to_millis(log.created_at),
            ],
        )
        .await
        .map_err(db_err("Failed to record search"))?;
        Ok(())
    }

    async fn search_logs(&self, limit: usize) -> Result<Vec<SearchLog>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, query, top_k, similarity_floor, results_count, top_similarity,
                        result_slots, embedding_ms, search_ms, created_at
                 FROM search_logs ORDER BY rowid DESC LIMIT ?1",
                [limit as i64],
            )
            .await
            .map_err(db_err("Failed to query search logs"))?;

        let mut logs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err("Failed to read search log"))? {
            match log_from_row(&row) {
                Ok(log) => logs.push(log),
                Err(e) => warn!(error = %e, "Skipping unreadable search log"),
            }
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(document_id: &str, chunk_index: usize) -> ChunkRecord {
        ChunkRecord {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            chunk_index,
            text: format!("chunk {} of {}", chunk_index, document_id),
            strategy: ChunkingStrategy::Section,
            start: chunk_index * 10,
            end: chunk_index * 10 + 9,
            embedding_model: "nomic-embed-text".into(),
            slot: None,
            created_at: Utc::now(),
        }
    }

    fn log(query: &str, slots: Vec<SlotId>) -> SearchLog {
        SearchLog {
            id: Uuid::new_v4(),
            query: query.into(),
            top_k: 5,
            similarity_floor: 0.7,
            results_count: slots.len(),
            top_similarity: slots.first().map(|_| 0.9),
            result_slots: slots,
            embedding_ms: 3,
            search_ms: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_assign_and_read_back() {
        let repo = TursoChunkRepository::new_memory().await.unwrap();
        let rows = vec![record("a", 1), record("a", 0), record("b", 0)];
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        repo.insert_chunks(rows).await.unwrap();

        repo.assign_slots(&ids, &[7, 8, 9]).await.unwrap();
        let doc = repo.chunks_for_document("a").await.unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc[0].chunk_index, 0);
        assert_eq!(doc[0].slot, Some(8));
        assert_eq!(doc[0].strategy, ChunkingStrategy::Section);
        assert_eq!(doc[1].text, "chunk 1 of a");
        assert_eq!(repo.chunk_count().await.unwrap(), 3);
        assert_eq!(repo.document_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected_whole() {
        let repo = TursoChunkRepository::new_memory().await.unwrap();
        let existing = record("a", 0);
        repo.insert_chunks(vec![existing.clone()]).await.unwrap();

        let err = repo
            .insert_chunks(vec![record("a", 1), existing])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Consistency(_)));
        assert_eq!(repo.chunk_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_assign_missing_row_rolls_back() {
        let repo = TursoChunkRepository::new_memory().await.unwrap();
        let row = record("a", 0);
        let id = row.id;
        repo.insert_chunks(vec![row]).await.unwrap();

        let err = repo
            .assign_slots(&[id, Uuid::new_v4()], &[1, 2])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Consistency(_)));
        let doc = repo.chunks_for_document("a").await.unwrap();
        assert_eq!(doc[0].slot, None);

        let err = repo.assign_slots(&[id], &[1, 2]).await.unwrap_err();
        assert!(matches!(err, AppError::Consistency(_)));
    }

    #[tokio::test]
    async fn test_remove_and_delete_document() {
        let repo = TursoChunkRepository::new_memory().await.unwrap();
        let rows = vec![record("a", 0), record("a", 1), record("b", 0)];
        let first = rows[0].id;
        repo.insert_chunks(rows).await.unwrap();

        assert_eq!(repo.remove_chunks(&[first, Uuid::new_v4()]).await.unwrap(), 1);
        assert_eq!(repo.delete_document("a").await.unwrap(), 1);
        assert_eq!(repo.delete_document("missing").await.unwrap(), 0);
        assert_eq!(repo.chunk_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_logs_newest_first() {
        let repo = TursoChunkRepository::new_memory().await.unwrap();
        repo.record_search(log("first", vec![])).await.unwrap();
        repo.record_search(log("second", vec![4, 2])).await.unwrap();

        let logs = repo.search_logs(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].query, "second");
        assert_eq!(logs[0].result_slots, vec![4, 2]);
        assert!(logs[1].top_similarity.is_none());

        assert_eq!(repo.search_logs(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index").join("chunks.db");

        let row = record("note-1", 0);
        let id = row.id;
        {
            let repo = TursoChunkRepository::new_local(&path).await.unwrap();
            repo.insert_chunks(vec![row]).await.unwrap();
            repo.assign_slots(&[id], &[3]).await.unwrap();
            repo.record_search(log("metformin dose", vec![3])).await.unwrap();
        }

        let reopened = TursoChunkRepository::new_local(&path).await.unwrap();
        let doc = reopened.chunks_for_document("note-1").await.unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc[0].id, id);
        assert_eq!(doc[0].slot, Some(3));
        assert_eq!(reopened.search_logs(5).await.unwrap()[0].query, "metformin dose");
    }
}
