//! Persistence layer for docqa-vector.
//!
//! A store directory holds numbered snapshots and a `CURRENT` pointer:
//!
//! ```text
//! <dir>/
//!   CURRENT                   -> "snapshot-0000000042"
//!   snapshot-0000000042/
//!     metadata.json           slot -> chunk metadata, counters, index digest
//!     index.bin               postcard-encoded vectors and IVF quantizer
//! ```
//!
//! A save writes metadata then index into a hidden staging directory, syncs
//! both, renames the directory into place and finally swaps `CURRENT`. Until
//! that last rename the previous pair stays the committed one, so the two
//! artifacts are only ever observed together.

use crate::config::Config;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::state::StoreState;
use crate::types::{SlotId, SlotMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const CURRENT_FILE: &str = "CURRENT";
const METADATA_FILE: &str = "metadata.json";
const INDEX_FILE: &str = "index.bin";
const SNAPSHOT_PREFIX: &str = "snapshot-";
const FORMAT_VERSION: u32 = 1;

/// Slot metadata artifact stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataFile {
    format_version: u32,
    embedding_model: String,
    dimension: usize,
    index_type: String,
    metric: DistanceMetric,
    next_id: SlotId,
    generation: u64,
    vector_count: usize,
    /// Hex SHA-256 of `index.bin`; binds the two artifacts together.
    index_sha256: String,
    saved_at: DateTime<Utc>,
    tombstones: Vec<SlotId>,
    slots: BTreeMap<SlotId, SlotMetadata>,
}

fn snapshot_name(generation: u64) -> String {
    format!("{}{:010}", SNAPSHOT_PREFIX, generation)
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(SNAPSHOT_PREFIX)?.parse().ok()
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Persist `state` as the new committed snapshot of `dir`.
///
/// On failure the previously committed snapshot is left untouched.
pub(crate) async fn save(dir: &Path, state: &StoreState, config: &Config) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let index_bytes = postcard::to_allocvec(&state.index)
        .map_err(|e| Error::Persistence(format!("Failed to encode index: {}", e)))?;

    let metadata = MetadataFile {
        format_version: FORMAT_VERSION,
        embedding_model: config.embedding_model.clone(),
        dimension: state.index.dimension(),
        index_type: state.index.kind().name().to_string(),
        metric: state.index.metric(),
        next_id: state.next_id,
        generation: state.generation,
        vector_count: state.index.len(),
        index_sha256: hex::encode(Sha256::digest(&index_bytes)),
        saved_at: Utc::now(),
        tombstones: state.tombstones.iter().copied().collect(),
        slots: state.metadata.clone(),
    };
    let metadata_json = serde_json::to_vec_pretty(&metadata)
        .map_err(|e| Error::Persistence(format!("Failed to serialize metadata: {}", e)))?;

    let name = snapshot_name(state.generation);
    let staging = dir.join(format!(".{}.tmp", name));
    let target = dir.join(&name);
    let pointer_tmp = dir.join(format!("{}.tmp", CURRENT_FILE));

    let committed: Result<()> = async {
        remove_dir_if_exists(&staging).await?;
        tokio::fs::create_dir_all(&staging).await?;
        write_synced(&staging.join(METADATA_FILE), &metadata_json).await?;
        write_synced(&staging.join(INDEX_FILE), &index_bytes).await?;

        // Leftover from a save that crashed before swapping the pointer.
        remove_dir_if_exists(&target).await?;
        tokio::fs::rename(&staging, &target).await?;

        write_synced(&pointer_tmp, name.as_bytes()).await?;
        tokio::fs::rename(&pointer_tmp, dir.join(CURRENT_FILE)).await?;
        Ok(())
    }
    .await;

    if let Err(e) = committed {
        for leftover in [&staging, &target] {
            if let Err(cleanup) = remove_dir_if_exists(leftover).await {
                warn!(path = ?leftover, error = %cleanup, "Failed to clean up aborted snapshot");
            }
        }
        let _ = tokio::fs::remove_file(&pointer_tmp).await;
        return Err(Error::Persistence(format!(
            "Failed to commit snapshot {}: {}",
            name, e
        )));
    }

    if let Err(e) = sync_dir(dir).await {
        warn!(path = ?dir, error = %e, "Failed to sync store directory");
    }
    prune(dir, &name).await;

    info!(
        path = ?dir,
        snapshot = %name,
        vectors = metadata.vector_count,
        "Committed index snapshot"
    );
    Ok(())
}

/// Remove every snapshot and staging directory other than `keep`.
async fn prune(dir: &Path, keep: &str) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = ?dir, error = %e, "Failed to list snapshots for pruning");
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let stale_snapshot = name.starts_with(SNAPSHOT_PREFIX) && name != keep;
        let stale_staging = name.starts_with('.') && name.ends_with(".tmp");
        if stale_snapshot || stale_staging {
            match remove_dir_if_exists(&entry.path()).await {
                Ok(()) => debug!(snapshot = name, "Pruned old snapshot"),
                Err(e) => warn!(snapshot = name, error = %e, "Failed to prune old snapshot"),
            }
        }
    }
}

/// Highest snapshot generation present in `dir`, committed or not.
pub(crate) async fn latest_generation(dir: &Path) -> u64 {
    let mut latest = 0;
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return latest;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Some(generation) = entry.file_name().to_str().and_then(parse_generation) {
            latest = latest.max(generation);
        }
    }
    latest
}

async fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::IndexCorrupt(format!("cannot read {}: {}", path.display(), e)))
}

/// Load the committed snapshot of `dir`.
///
/// Returns `Ok(None)` when nothing was ever committed and
/// `Err(Error::IndexCorrupt)` when the committed pair is unusable.
pub(crate) async fn load(dir: &Path, config: &Config) -> Result<Option<StoreState>> {
    let pointer = dir.join(CURRENT_FILE);
    let name = match tokio::fs::read_to_string(&pointer).await {
        Ok(contents) => contents.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::IndexCorrupt(format!(
                "cannot read {}: {}",
                pointer.display(),
                e
            )))
        }
    };
    if parse_generation(&name).is_none() {
        return Err(Error::IndexCorrupt(format!(
            "CURRENT names an invalid snapshot '{}'",
            name
        )));
    }

    let snapshot = dir.join(&name);
    let metadata_bytes = read_artifact(&snapshot.join(METADATA_FILE)).await?;
    let index_bytes = read_artifact(&snapshot.join(INDEX_FILE)).await?;

    let metadata: MetadataFile = serde_json::from_slice(&metadata_bytes)
        .map_err(|e| Error::IndexCorrupt(format!("invalid {}: {}", METADATA_FILE, e)))?;

    if metadata.format_version != FORMAT_VERSION {
        return Err(Error::IndexCorrupt(format!(
            "unsupported format version {}",
            metadata.format_version
        )));
    }
    let digest = hex::encode(Sha256::digest(&index_bytes));
    if digest != metadata.index_sha256 {
        return Err(Error::IndexCorrupt(format!(
            "{} does not match the digest recorded in {}",
            INDEX_FILE, METADATA_FILE
        )));
    }
    if metadata.embedding_model != config.embedding_model {
        return Err(Error::IndexCorrupt(format!(
            "snapshot holds vectors of model '{}', store is configured for '{}'",
            metadata.embedding_model, config.embedding_model
        )));
    }
    if metadata.dimension != config.dimension {
        return Err(Error::IndexCorrupt(format!(
            "snapshot dimension {} differs from configured {}",
            metadata.dimension, config.dimension
        )));
    }
    if metadata.index_type != config.index.name() || metadata.metric != config.metric {
        return Err(Error::IndexCorrupt(format!(
            "snapshot is a {} index over {}, store is configured for {} over {}",
            metadata.index_type,
            metadata.metric,
            config.index.name(),
            config.metric
        )));
    }

    let index: VectorIndex = postcard::from_bytes(&index_bytes)
        .map_err(|e| Error::IndexCorrupt(format!("invalid {}: {}", INDEX_FILE, e)))?;
    index.verify()?;
    if index.len() != metadata.vector_count || index.dimension() != metadata.dimension {
        return Err(Error::IndexCorrupt(
            "index contents disagree with metadata counters".into(),
        ));
    }

    let state = StoreState {
        index,
        metadata: metadata.slots,
        tombstones: metadata.tombstones.into_iter().collect(),
        next_id: metadata.next_id,
        generation: metadata.generation,
    };
    state
        .check_alignment()
        .map_err(|e| Error::IndexCorrupt(e.to_string()))?;

    debug!(snapshot = %name, vectors = state.index.len(), "Loaded index snapshot");
    Ok(Some(state))
}
