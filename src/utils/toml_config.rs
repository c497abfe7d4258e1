//! Layered configuration for docqa
//!
//! Values are resolved in this order, later sources winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`docqa.toml` in the working directory, or `--config PATH`)
//! 3. `DOCQA_*` environment variables, with `__` between section and key
//!    (`DOCQA_VECTOR__NLIST=64`, `DOCQA_GENERATION__MODEL=llama3.1`)
//!
//! A `.env` file is read by the binary before any of this happens.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::rag::chunker::{ChunkerConfig, ChunkingStrategy};
use crate::rag::synthesizer::PromptConfig;
use docqa_vector::{DeletePolicy, DistanceMetric, IndexKind};

/// File picked up when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "docqa.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "DOCQA";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocqaConfig {
    pub logging: LoggingConfig,
    pub chunking: ChunkingConfig,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub prompts: PromptConfig,
}

// ============= Logging Configuration =============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ============= Chunking Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Strategy used when a request names none.
    pub strategy: ChunkingStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let sizes = ChunkerConfig::default();
        Self {
            strategy: ChunkingStrategy::Paragraph,
            chunk_size: sizes.chunk_size,
            chunk_overlap: sizes.chunk_overlap,
            min_chunk_size: sizes.min_chunk_size,
            max_chunk_size: sizes.max_chunk_size,
        }
    }
}

impl ChunkingConfig {
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            min_chunk_size: self.min_chunk_size,
            max_chunk_size: self.max_chunk_size,
        }
    }
}

// ============= Vector Store Configuration =============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    #[default]
    Flat,
    IvfFlat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Parent directory; each embedding configuration gets its own subdirectory.
    pub data_path: PathBuf,
    pub index_type: IndexType,
    pub metric: DistanceMetric,
    pub nlist: usize,
    pub nprobe: usize,
    pub train_iterations: usize,
    pub delete_policy: DeletePolicy,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data/indices"),
            index_type: IndexType::Flat,
            metric: DistanceMetric::L2,
            nlist: 100,
            nprobe: 10,
            train_iterations: 20,
            delete_policy: DeletePolicy::Tombstone,
        }
    }
}

impl VectorConfig {
    pub fn index_kind(&self) -> IndexKind {
        match self.index_type {
            IndexType::Flat => IndexKind::Flat,
            IndexType::IvfFlat => IndexKind::IvfFlat {
                nlist: self.nlist,
                nprobe: self.nprobe,
            },
        }
    }
}

// ============= Provider Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    /// Longer inputs are truncated before embedding.
    pub max_input_chars: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: "all-minilm".to_string(),
            dimension: 384,
            batch_size: 32,
            max_input_chars: 2048,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: "llama3.2".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_secs: 120,
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

// ============= Retrieval Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub search_top_k: usize,
    pub search_similarity_threshold: f32,
    pub qa_top_k: usize,
    pub qa_min_similarity: f32,
    /// Longest accepted question, in characters.
    pub max_query_length: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_top_k: 10,
            search_similarity_threshold: 0.7,
            qa_top_k: 5,
            qa_min_similarity: 0.7,
            max_query_length: 500,
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Failed to render TOML: {0}")]
    RenderError(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl DocqaConfig {
    /// Load and validate the layered configuration.
    ///
    /// An explicit `path` must exist. Without one, `docqa.toml` is used when
    /// present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// [`DocqaConfig::load`] with a custom environment prefix.
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.to_path_buf()));
                }
                builder = builder.add_source(
                    config::File::from(path).format(config::FileFormat::Toml),
                );
            }
            None => {
                builder = builder.add_source(
                    config::File::new(DEFAULT_CONFIG_FILE, config::FileFormat::Toml)
                        .required(false),
                );
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: DocqaConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunking.chunk_size must be positive".into(),
            ));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }
        if chunking.min_chunk_size > chunking.max_chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "chunking.min_chunk_size ({}) exceeds chunking.max_chunk_size ({})",
                chunking.min_chunk_size, chunking.max_chunk_size
            )));
        }

        if self.embedding.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimension must be positive".into(),
            ));
        }
        if self.embedding.model.trim().is_empty() || self.generation.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "embedding.model and generation.model must be set".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size must be positive".into(),
            ));
        }

        if self.vector.index_type == IndexType::IvfFlat
            && (self.vector.nlist == 0 || self.vector.nprobe == 0)
        {
            return Err(ConfigError::ValidationError(
                "vector.nlist and vector.nprobe must be positive".into(),
            ));
        }
        if self.vector.train_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "vector.train_iterations must be positive".into(),
            ));
        }

        for (name, floor) in [
            ("retrieval.search_similarity_threshold", self.retrieval.search_similarity_threshold),
            ("retrieval.qa_min_similarity", self.retrieval.qa_min_similarity),
        ] {
            if !(0.0..=1.0).contains(&floor) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be within [0, 1], got {}",
                    name, floor
                )));
            }
        }
        if self.retrieval.max_query_length == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.max_query_length must be positive".into(),
            ));
        }

        for placeholder in ["{context}", "{question}"] {
            if !self.prompts.question_template.contains(placeholder) {
                return Err(ConfigError::ValidationError(format!(
                    "prompts.question_template is missing {}",
                    placeholder
                )));
            }
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Directory owned by the current embedding configuration.
    ///
    /// Named `<model>-<dimension>-<index type>` so a different embedding space
    /// never opens another one's index.
    pub fn index_dir(&self) -> PathBuf {
        let model: String = self
            .embedding
            .model
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let kind = self.vector.index_kind();
        self.vector
            .data_path
            .join(format!("{}-{}-{}", model, self.embedding.dimension, kind.name()))
    }

    /// Vector store settings for the persistent index.
    pub fn vector_store_config(&self) -> docqa_vector::Config {
        docqa_vector::Config::persistent(
            self.index_dir(),
            self.embedding.model.clone(),
            self.embedding.dimension,
        )
        .with_metric(self.vector.metric)
        .with_index(self.vector.index_kind())
        .with_delete_policy(self.vector.delete_policy)
        .with_train_iterations(self.vector.train_iterations)
    }

    /// Chunk rows and search logs, kept beside the vector snapshots.
    pub fn database_path(&self) -> PathBuf {
        self.index_dir().join("chunks.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = DocqaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.vector.nlist, 100);
        assert_eq!(config.retrieval.qa_top_k, 5);
        assert!(config.prompts.system.contains("[Source X]"));
    }

    #[test]
    fn test_database_lives_in_index_dir() {
        let config = DocqaConfig::default();
        let path = config.database_path();
        assert_eq!(path.parent(), Some(config.index_dir().as_path()));
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("chunks.db"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[chunking]
strategy = "section"
chunk_size = 256

[vector]
index_type = "ivf_flat"
nlist = 16
metric = "inner_product"

[embedding]
model = "nomic-embed-text:latest"
dimension = 768
"#
        )
        .unwrap();

        let config = DocqaConfig::load_with_prefix(Some(file.path()), "DOCQA_TEST_UNSET").unwrap();
        assert_eq!(config.chunking.strategy, ChunkingStrategy::Section);
        assert_eq!(config.chunking.chunk_size, 256);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(
            config.vector.index_kind(),
            IndexKind::IvfFlat { nlist: 16, nprobe: 10 }
        );
        assert_eq!(config.vector.metric, DistanceMetric::InnerProduct);
        assert!(config
            .index_dir()
            .ends_with("nomic-embed-text_latest-768-ivf_flat"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[retrieval]\nqa_top_k = 3").unwrap();

        std::env::set_var("DOCQA_ENVTEST_RETRIEVAL__QA_TOP_K", "8");
        let config = DocqaConfig::load_with_prefix(Some(file.path()), "DOCQA_ENVTEST").unwrap();
        std::env::remove_var("DOCQA_ENVTEST_RETRIEVAL__QA_TOP_K");

        assert_eq!(config.retrieval.qa_top_k, 8);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = DocqaConfig::load(Some(Path::new("/nonexistent/docqa.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = DocqaConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = DocqaConfig::default();
        config.retrieval.qa_min_similarity = 1.5;
        assert!(config.validate().is_err());

        let mut config = DocqaConfig::default();
        config.prompts.question_template = "Question: {question}".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_toml_round_trips_through_loader() {
        let config = DocqaConfig::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[vector]"));

        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(rendered.as_bytes()).unwrap();
        let loaded = DocqaConfig::load_with_prefix(Some(file.path()), "DOCQA_TEST_UNSET").unwrap();
        assert_eq!(loaded, config);
    }
}
