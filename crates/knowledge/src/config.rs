//! Knowledge base configuration management.
//!
//! Every threshold the engine applies (FAQ ratio, relevance floor, cache TTL)
//! is read from here; none are hard-coded in the pipeline.

use crate::embeddings::EmbeddingConfig;
use mentor_core::{AppError, AppResult};
use mentor_llm::GenerationParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBaseConfig {
    /// Name of the knowledge base
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub faq: FaqConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    /// Concurrent embedding/generation jobs
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between background sync cycles
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

/// Where documents are mirrored from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Root of the object store (relative paths resolve against the workspace)
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Key prefix holding the knowledge base documents
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Name of the metadata sidecar object under the prefix
    #[serde(default = "default_sidecar")]
    pub sidecar: String,
}

/// FAQ catalog location and match threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaqConfig {
    /// Catalog file (YAML); no catalog means every query goes to retrieval
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Minimum similarity ratio for a trigger phrase to match
    #[serde(default = "default_faq_threshold")]
    pub threshold: f32,
}

/// Vector retrieval tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Candidates scoring below this are never used as context
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f32,

    /// Corpora up to this size are scanned exhaustively
    #[serde(default = "default_exact_threshold")]
    pub exact_threshold: usize,

    /// Inverted lists probed per query above `exact_threshold`
    #[serde(default = "default_n_probe")]
    pub n_probe: usize,
}

/// Cache capacities and response freshness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_embedding_capacity")]
    pub embedding_capacity: usize,

    #[serde(default = "default_response_capacity")]
    pub response_capacity: usize,

    #[serde(default = "default_response_ttl_secs")]
    pub response_ttl_secs: u64,
}

/// Generation settings, fixed per deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    /// Generation provider name
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(flatten)]
    pub params: GenerationParams,

    /// Deadline for one model call
    #[serde(default = "default_generation_timeout_ms")]
    pub timeout_ms: u64,

    /// Upper bound on context characters placed in a prompt
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Prior turns included ahead of the question
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_workers() -> usize {
    4
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("kb")
}

fn default_prefix() -> String {
    "docs/".to_string()
}

fn default_sidecar() -> String {
    "_manifest.json".to_string()
}

fn default_faq_threshold() -> f32 {
    0.8
}

fn default_top_k() -> usize {
    4
}

fn default_relevance_floor() -> f32 {
    0.20
}

fn default_exact_threshold() -> usize {
    512
}

fn default_n_probe() -> usize {
    4
}

fn default_embedding_capacity() -> usize {
    4096
}

fn default_response_capacity() -> usize {
    1024
}

fn default_response_ttl_secs() -> u64 {
    300
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}

fn default_generation_timeout_ms() -> u64 {
    20_000
}

fn default_max_context_chars() -> usize {
    4000
}

fn default_history_turns() -> usize {
    4
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            prefix: default_prefix(),
            sidecar: default_sidecar(),
        }
    }
}

impl Default for FaqConfig {
    fn default() -> Self {
        Self {
            path: None,
            threshold: default_faq_threshold(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            relevance_floor: default_relevance_floor(),
            exact_threshold: default_exact_threshold(),
            n_probe: default_n_probe(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_capacity: default_embedding_capacity(),
            response_capacity: default_response_capacity(),
            response_ttl_secs: default_response_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_secs)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            endpoint: None,
            params: GenerationParams::default(),
            timeout_ms: default_generation_timeout_ms(),
            max_context_chars: default_max_context_chars(),
            history_turns: default_history_turns(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            faq: FaqConfig::default(),
            retrieval: RetrievalConfig::default(),
            cache: CacheConfig::default(),
            generation: GenerationConfig::default(),
            workers: default_workers(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

impl KnowledgeBaseConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if !(0.0..=1.0).contains(&self.faq.threshold) {
            return Err(AppError::Config(format!(
                "faq.threshold must be within [0, 1], got {}",
                self.faq.threshold
            )));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.relevance_floor) {
            return Err(AppError::Config(format!(
                "retrieval.relevance_floor must be within [-1, 1], got {}",
                self.retrieval.relevance_floor
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(AppError::Config("retrieval.top_k must be positive".to_string()));
        }
        if self.cache.embedding_capacity == 0 || self.cache.response_capacity == 0 {
            return Err(AppError::Config("cache capacities must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(AppError::Config("workers must be positive".to_string()));
        }
        Ok(())
    }

    /// Storage root resolved against the workspace.
    pub fn storage_root(&self, workspace: &Path) -> PathBuf {
        resolve(workspace, &self.storage.root)
    }

    /// FAQ catalog path resolved against the workspace.
    pub fn faq_path(&self, workspace: &Path) -> Option<PathBuf> {
        self.faq.path.as_ref().map(|p| resolve(workspace, p))
    }
}

fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Load knowledge base configuration.
///
/// Loads from `.mentor/knowledge/<base>/config.yaml` if it exists,
/// otherwise returns defaults named after the base.
pub fn load_config(workspace: &Path, base_name: &str) -> AppResult<KnowledgeBaseConfig> {
    let config_path = get_config_path(workspace, base_name);

    let mut config = if config_path.exists() {
        let content = fs::read_to_string(&config_path).map_err(|e| {
            AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
        })?;

        let config: KnowledgeBaseConfig = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
        })?;

        tracing::debug!("Loaded knowledge base config for '{}'", base_name);
        config
    } else {
        tracing::debug!(
            "Using default knowledge base config for '{}' (no config file found)",
            base_name
        );
        KnowledgeBaseConfig::default()
    };

    config.name = base_name.to_string();
    config.validate()?;
    Ok(config)
}

/// Save knowledge base configuration.
pub fn save_config(workspace: &Path, config: &KnowledgeBaseConfig) -> AppResult<()> {
    let config_path = get_config_path(workspace, &config.name);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Knowledge(format!("Failed to create config directory: {}", e))
        })?;
    }

    let yaml = serde_yaml::to_string(config)?;

    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Knowledge(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved knowledge base config for '{}'", config.name);
    Ok(())
}

/// Get the base directory for a knowledge base.
pub fn get_base_dir(workspace: &Path, base_name: &str) -> PathBuf {
    workspace
        .join(mentor_core::config::STATE_DIR)
        .join("knowledge")
        .join(base_name)
}

/// Get the path to a base's config file.
pub fn get_config_path(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("config.yaml")
}

/// Get the SQLite document store path for a base.
pub fn get_store_path(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("store.sqlite")
}

/// Get the persisted manifest path for a base.
pub fn get_manifest_path(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("manifest.json")
}
