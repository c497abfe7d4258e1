//! Shared helpers for the integration tests.

#![allow(dead_code)]

pub mod mocks;

use std::path::Path;
use std::sync::Arc;

use docqa::{
    ChunkRepository, DocqaConfig, DocqaPipeline, InMemoryChunkRepository, TursoChunkRepository,
    VectorStore,
};
use docqa_vector::Config;

use mocks::{HashEmbedder, MockGenerator, HASH_DIMENSION, HASH_MODEL};

/// Three paragraphs with disjoint vocabularies.
pub const DISCHARGE_NOTE: &str = "Patient discharged on metformin 500 mg twice daily with meals for type two diabetes.

Allergies reported include penicillin causing hives and sulfa drugs causing severe rash.

Follow up appointment scheduled with cardiology clinic in three weeks for echocardiogram review.";

pub const METFORMIN_PARAGRAPH: &str =
    "Patient discharged on metformin 500 mg twice daily with meals for type two diabetes.";

pub const ALLERGY_PARAGRAPH: &str =
    "Allergies reported include penicillin causing hives and sulfa drugs causing severe rash.";

pub async fn memory_pipeline(generator: Arc<MockGenerator>) -> DocqaPipeline {
    let store = VectorStore::open(Config::memory(HASH_MODEL, HASH_DIMENSION))
        .await
        .unwrap();
    build(store, generator, Arc::new(InMemoryChunkRepository::new()))
}

/// Vectors and chunk rows both stored under `dir`.
pub async fn persistent_pipeline(dir: &Path, generator: Arc<MockGenerator>) -> DocqaPipeline {
    let store = VectorStore::open(Config::persistent(dir, HASH_MODEL, HASH_DIMENSION))
        .await
        .unwrap();
    let repository = TursoChunkRepository::new_local(dir.join("chunks.db"))
        .await
        .unwrap();
    build(store, generator, Arc::new(repository))
}

fn build(
    store: VectorStore,
    generator: Arc<MockGenerator>,
    repository: Arc<dyn ChunkRepository>,
) -> DocqaPipeline {
    DocqaPipeline::new(
        &DocqaConfig::default(),
        store,
        Arc::new(HashEmbedder::new()),
        generator,
        repository,
    )
    .unwrap()
}
