//! TOML configuration.
//!
//! Only `[db].path` and `[server].bind` are required; every other section
//! falls back to defaults. See `config/grounded.example.toml`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use grounded_core::chunk::ChunkerConfig;

use crate::extract::{MIME_DOCX, MIME_PDF, MIME_TEXT};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size_tokens")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: default_chunk_size_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

impl ChunkingConfig {
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size_tokens: self.chunk_size_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }
}

fn default_chunk_size_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Total attempts per text, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (OpenAI-compatible or Ollama).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_embedding_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    /// `sqlite`, `memory`, or `qdrant`.
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Name of the environment variable holding the Qdrant API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_vector_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            url: None,
            collection: default_collection(),
            api_key_env: None,
            timeout_secs: default_vector_timeout_secs(),
        }
    }
}

fn default_vector_backend() -> String {
    "sqlite".to_string()
}
fn default_collection() -> String {
    "grounded_chunks".to_string()
}
fn default_vector_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_generation_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            url: None,
        }
    }
}

fn default_generation_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            confidence_threshold: default_confidence_threshold(),
            max_context_tokens: default_max_context_tokens(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

/// Upper bound on `top_k` accepted from callers.
pub const MAX_TOP_K: usize = 50;

fn default_top_k() -> usize {
    5
}
fn default_confidence_threshold() -> f32 {
    0.7
}
fn default_max_context_tokens() -> usize {
    2000
}
fn default_excerpt_chars() -> usize {
    grounded_core::context::DEFAULT_EXCERPT_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Share of chunks that must embed for a document to become READY.
    /// At least one chunk is always required.
    #[serde(default)]
    pub min_success_ratio: f64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            min_success_ratio: 0.0,
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_queue_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            allowed_content_types: default_allowed_content_types(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_allowed_content_types() -> Vec<String> {
    vec![
        MIME_PDF.to_string(),
        MIME_DOCX.to_string(),
        MIME_TEXT.to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size_tokens == 0 {
        anyhow::bail!("chunking.chunk_size_tokens must be > 0");
    }

    if config.retrieval.top_k == 0 || config.retrieval.top_k > MAX_TOP_K {
        anyhow::bail!("retrieval.top_k must be in [1, {}]", MAX_TOP_K);
    }
    if !(0.0..=1.0).contains(&config.retrieval.confidence_threshold) {
        anyhow::bail!("retrieval.confidence_threshold must be in [0.0, 1.0]");
    }
    if config.retrieval.max_context_tokens == 0 {
        anyhow::bail!("retrieval.max_context_tokens must be > 0");
    }

    if config.embedding.max_attempts == 0 {
        anyhow::bail!("embedding.max_attempts must be >= 1");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0 when set");
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.vector_store.backend.as_str() {
        "sqlite" | "memory" => {}
        "qdrant" => {
            if config.vector_store.url.is_none() {
                anyhow::bail!("vector_store.url must be specified for the qdrant backend");
            }
        }
        other => anyhow::bail!(
            "Unknown vector store backend: '{}'. Must be sqlite, memory, or qdrant.",
            other
        ),
    }

    if config.ingestion.workers == 0 {
        anyhow::bail!("ingestion.workers must be >= 1");
    }
    if config.ingestion.queue_capacity == 0 {
        anyhow::bail!("ingestion.queue_capacity must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.ingestion.min_success_ratio) {
        anyhow::bail!("ingestion.min_success_ratio must be in [0.0, 1.0]");
    }

    if config.upload.max_file_bytes == 0 {
        anyhow::bail!("upload.max_file_bytes must be > 0");
    }

    Ok(())
}
