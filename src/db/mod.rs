//! Relational side of the index: chunk rows and query analytics.
//!
//! Vectors and their slot metadata live in `docqa-vector`; this module holds
//! the chunk rows and search logs, either in libSQL or in process memory.

pub mod chunks;
pub mod turso;

pub use chunks::{ChunkRecord, ChunkRepository, InMemoryChunkRepository};
pub use turso::TursoChunkRepository;
