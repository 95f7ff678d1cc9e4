//! Configuration settings for tubeqa.

use crate::error::{Result, TubeqaError};
use crate::evaluation::ParseFailurePolicy;
use crate::retrieval::{MergePolicy, SearchMethod};
use crate::rewrite::RewriteStrategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
///
/// Built once at startup and handed to every component constructor; nothing
/// mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub store: StoreSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub vector_index: VectorIndexSettings,
    pub retrieval: RetrievalSettings,
    pub rag: RagSettings,
    pub ground_truth: GroundTruthSettings,
    pub evaluation: EvaluationSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.tubeqa".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Segment store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Path to the SQLite database holding videos, segments and evaluation records.
    pub sqlite_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.tubeqa/tubeqa.db".to_string(),
        }
    }
}

/// Backend serving a capability (embeddings or text generation).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityProvider {
    /// OpenAI API (or an OpenAI-compatible gateway).
    #[default]
    OpenAI,
    /// Local Ollama server.
    Ollama,
}

impl std::str::FromStr for CapabilityProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(CapabilityProvider::OpenAI),
            "ollama" => Ok(CapabilityProvider::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

impl std::fmt::Display for CapabilityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityProvider::OpenAI => write!(f, "openai"),
            CapabilityProvider::Ollama => write!(f, "ollama"),
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding provider (openai, ollama).
    pub provider: CapabilityProvider,
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
    /// Base URL override (OpenAI-compatible gateway or Ollama host).
    pub api_base: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: CapabilityProvider::OpenAI,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_base: None,
        }
    }
}

/// Text generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Generation provider (openai, ollama).
    pub provider: CapabilityProvider,
    /// Model used for answers, rewriting and ground-truth questions.
    pub model: String,
    /// Model used as the relevance judge. Falls back to `model`.
    pub judge_model: Option<String>,
    /// Sampling temperature for answers.
    pub temperature: f32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Base URL override (OpenAI-compatible gateway or Ollama host).
    pub api_base: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: CapabilityProvider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            judge_model: None,
            temperature: 0.2,
            timeout_secs: 120,
            api_base: None,
        }
    }
}

impl GenerationSettings {
    /// Model used by the relevance judge.
    pub fn judge_model(&self) -> &str {
        self.judge_model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.model)
    }
}

/// Vector index backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexProvider {
    /// SQLite table with cosine similarity computed in process.
    #[default]
    Sqlite,
    /// Process-local index, lost on exit.
    Memory,
    /// Elasticsearch `dense_vector` index.
    Elasticsearch,
}

impl std::str::FromStr for IndexProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(IndexProvider::Sqlite),
            "memory" => Ok(IndexProvider::Memory),
            "elasticsearch" | "es" => Ok(IndexProvider::Elasticsearch),
            _ => Err(format!("Unknown index provider: {}", s)),
        }
    }
}

impl std::fmt::Display for IndexProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexProvider::Sqlite => write!(f, "sqlite"),
            IndexProvider::Memory => write!(f, "memory"),
            IndexProvider::Elasticsearch => write!(f, "elasticsearch"),
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexSettings {
    /// Index provider (sqlite, memory, elasticsearch).
    pub provider: IndexProvider,
    /// Path to the SQLite vector database (sqlite provider).
    pub sqlite_path: String,
    /// Elasticsearch base URL (elasticsearch provider).
    pub elasticsearch_url: String,
    /// Elasticsearch index name.
    pub index_name: String,
    /// Request timeout in seconds for remote backends.
    pub timeout_secs: u64,
}

impl Default for VectorIndexSettings {
    fn default() -> Self {
        Self {
            provider: IndexProvider::Sqlite,
            sqlite_path: "~/.tubeqa/vectors.db".to_string(),
            elasticsearch_url: "http://localhost:9200".to_string(),
            index_name: "tubeqa-segments".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Hits requested from the index per rewritten query.
    pub top_k: usize,
    /// Segments kept after merging all queries.
    pub context_size: usize,
    /// Per-query scores at or below this value are dropped before merging.
    pub min_score: f32,
    /// How scores from several query variants are combined.
    pub merge_policy: MergePolicy,
    /// Embedding similarity, keyword match, or both fused.
    pub search_method: SearchMethod,
    /// Query rewriting strategy.
    pub rewrite_strategy: RewriteStrategy,
    /// Maximum number of rewritten variants added to the original question.
    pub max_rewrites: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            context_size: 5,
            min_score: 0.0,
            merge_policy: MergePolicy::Max,
            search_method: SearchMethod::Embedding,
            rewrite_strategy: RewriteStrategy::None,
            max_rewrites: 3,
        }
    }
}

/// Answer generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    /// Character budget for the transcript context.
    pub max_context_chars: usize,
    /// Budget multiplier used for the single retry after a generation failure.
    pub retry_context_ratio: f32,
    /// Include video timestamps in the prompt context.
    pub include_timestamps: bool,
    /// Tries against an unreachable index before giving up, the first included.
    pub index_retry_attempts: u32,
    /// Delay before the first retry in milliseconds; doubles on each further retry.
    pub index_retry_base_ms: u64,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            max_context_chars: 6000,
            retry_context_ratio: 0.5,
            include_timestamps: true,
            index_retry_attempts: 3,
            index_retry_base_ms: 200,
        }
    }
}

/// Ground-truth generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundTruthSettings {
    /// Questions requested per segment.
    pub questions_per_segment: usize,
    /// Maximum concurrent segment requests.
    pub max_concurrent: usize,
    /// Generation calls per segment to collect `questions_per_segment` new questions.
    pub max_attempts: usize,
}

impl Default for GroundTruthSettings {
    fn default() -> Self {
        Self {
            questions_per_segment: 3,
            max_concurrent: 4,
            max_attempts: 3,
        }
    }
}

/// Evaluation harness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    /// Maximum concurrent evaluation units.
    pub max_concurrent: usize,
    /// Restrict each question's retrieval to its own video.
    pub scope_to_video: bool,
    /// What to do with judge output that is not one of the three labels.
    pub judge_parse_failure: ParseFailurePolicy,
    /// `k` values tried by a parameter sweep.
    pub sweep_k_values: Vec<usize>,
    /// Rewrite strategies tried by a parameter sweep.
    pub sweep_strategies: Vec<RewriteStrategy>,
    /// Search methods tried by a parameter sweep.
    pub sweep_search_methods: Vec<SearchMethod>,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            scope_to_video: false,
            judge_parse_failure: ParseFailurePolicy::NonRelevant,
            sweep_k_values: vec![1, 3, 5, 10],
            sweep_strategies: vec![RewriteStrategy::None, RewriteStrategy::Expand],
            sweep_search_methods: vec![SearchMethod::Embedding],
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Settings>(&content)?
        } else {
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make a component misbehave silently.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(TubeqaError::Config("retrieval.top_k must be at least 1".to_string()));
        }
        if self.retrieval.context_size == 0 {
            return Err(TubeqaError::Config(
                "retrieval.context_size must be at least 1".to_string(),
            ));
        }
        if self.rag.max_context_chars == 0 {
            return Err(TubeqaError::Config(
                "rag.max_context_chars must be at least 1".to_string(),
            ));
        }
        if !(self.rag.retry_context_ratio > 0.0 && self.rag.retry_context_ratio <= 1.0) {
            return Err(TubeqaError::Config(
                "rag.retry_context_ratio must be in (0, 1]".to_string(),
            ));
        }
        if self.rag.index_retry_attempts == 0 {
            return Err(TubeqaError::Config(
                "rag.index_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.rag.index_retry_base_ms > 60_000 {
            return Err(TubeqaError::Config(
                "rag.index_retry_base_ms must be at most 60000".to_string(),
            ));
        }
        if self.ground_truth.questions_per_segment == 0 {
            return Err(TubeqaError::Config(
                "ground_truth.questions_per_segment must be at least 1".to_string(),
            ));
        }
        if self.ground_truth.max_attempts == 0 {
            return Err(TubeqaError::Config(
                "ground_truth.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(TubeqaError::Config("embedding.dimensions must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TubeqaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tubeqa")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded segment store path.
    pub fn store_path(&self) -> PathBuf {
        Self::expand_path(&self.store.sqlite_path)
    }

    /// Get the expanded SQLite vector index path.
    pub fn vector_index_path(&self) -> PathBuf {
        Self::expand_path(&self.vector_index.sqlite_path)
    }
}
