//! Mnemos configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main Mnemos configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Ingestion pipeline configuration
    pub ingestion: IngestionConfig,

    /// Retrieval engine configuration
    pub retrieval: RetrievalConfig,

    /// Consolidation engine configuration
    pub consolidation: ConsolidationConfig,

    /// Semantic triple layer
    pub triples: TriplesConfig,

    /// Proactive context prediction
    pub prediction: PredictionConfig,

    /// Capability call policy
    pub capability: CapabilityConfig,

    /// Conversation session buffer
    pub session: SessionConfig,

    /// OpenAI-compatible provider
    pub provider: ProviderConfig,

    /// Storage locations
    pub storage: StorageConfig,
}

impl MemoryConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: MemoryConfig = toml::from_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `MNEMOS_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("MNEMOS_DATA_DIR") {
            if !dir.is_empty() {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = std::env::var("MNEMOS_BASE_URL") {
            if !url.is_empty() {
                self.provider.base_url = url;
            }
        }
    }

    /// Reject values the pipelines cannot work with.
    pub fn validate(&self) -> Result<()> {
        let unit = [
            (
                "ingestion.category_match_threshold",
                self.ingestion.category_match_threshold,
            ),
            (
                "ingestion.contradiction_threshold",
                self.ingestion.contradiction_threshold,
            ),
            ("ingestion.reinforcement_step", self.ingestion.reinforcement_step),
            (
                "ingestion.category_candidate_min_score",
                self.ingestion.category_candidate_min_score,
            ),
            ("retrieval.min_relevance", self.retrieval.min_relevance),
            (
                "retrieval.deep_relevance_factor",
                self.retrieval.deep_relevance_factor,
            ),
            ("retrieval.vector_min_score", self.retrieval.vector_min_score),
            ("triples.min_score", self.triples.min_score),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        let decay = self.retrieval.scoring.recency_decay;
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(Error::Config(format!(
                "retrieval.scoring.recency_decay must be within (0, 1], got {decay}"
            )));
        }
        if self.retrieval.rrf_k == 0 {
            return Err(Error::Config("retrieval.rrf_k must be positive".to_string()));
        }
        if self.retrieval.fast_limit == 0 || self.retrieval.fused_candidates == 0 {
            return Err(Error::Config(
                "retrieval limits must be positive".to_string(),
            ));
        }
        if self.capability.max_attempts == 0 {
            return Err(Error::Config(
                "capability.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.capability.completion_timeout_secs == 0
            || self.capability.embedding_timeout_secs == 0
            || self.capability.reasoning_timeout_secs == 0
        {
            return Err(Error::Config(
                "capability timeouts must be positive".to_string(),
            ));
        }
        if self.consolidation.split_target_clusters < 2 {
            return Err(Error::Config(
                "consolidation.split_target_clusters must be at least 2".to_string(),
            ));
        }
        if self.prediction.memory_line_chars == 0 {
            return Err(Error::Config(
                "prediction.memory_line_chars must be positive".to_string(),
            ));
        }
        if self.session.chars_per_token == 0 {
            return Err(Error::Config(
                "session.chars_per_token must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Minimum category similarity to reuse an existing category
    pub category_match_threshold: f32,

    /// Minimum item similarity before a contradiction judgment is requested
    pub contradiction_threshold: f32,

    /// Importance added on each reinforcement
    pub reinforcement_step: f32,

    /// Nearby categories offered to the path-suggestion contract
    pub category_candidates: usize,

    /// Minimum similarity for a category to be offered as a candidate
    pub category_candidate_min_score: f32,

    /// Path used when neither extraction nor suggestion yields one
    pub default_category: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            category_match_threshold: 0.7,
            contradiction_threshold: 0.75,
            reinforcement_step: 0.1,
            category_candidates: 5,
            category_candidate_min_score: 0.2,
            default_category: "uncategorized".to_string(),
        }
    }
}

/// Retrieval engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// RRF smoothing constant
    pub rrf_k: u32,

    /// Fused candidates kept before re-scoring
    pub fused_candidates: usize,

    /// Items returned in fast mode
    pub fast_limit: usize,

    /// Items recalled to seed deep mode
    pub deep_recall: usize,

    /// Similarity-weighted fused relevance below which candidates are discarded
    pub min_relevance: f32,

    /// Multiplier applied to `min_relevance` in deep mode
    pub deep_relevance_factor: f32,

    /// Minimum cosine similarity for vector hits
    pub vector_min_score: f32,

    /// Items quoted in the fast-mode suggested context
    pub context_items: usize,

    /// Multi-signal scoring weights
    pub scoring: ScoringConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60,
            fused_candidates: 20,
            fast_limit: 5,
            deep_recall: 20,
            min_relevance: 0.3,
            deep_relevance_factor: 0.8,
            vector_min_score: 0.2,
            context_items: 3,
            scoring: ScoringConfig::default(),
        }
    }
}

/// Weights for `score = α_r·relevance + α_c·recency + α_i·importance`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weight of normalized fused relevance
    pub alpha_relevance: f32,

    /// Weight of recency decay
    pub alpha_recency: f32,

    /// Weight of stored importance
    pub alpha_importance: f32,

    /// Per-hour decay base
    pub recency_decay: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            alpha_relevance: 1.0,
            alpha_recency: 1.0,
            alpha_importance: 1.0,
            recency_decay: 0.995,
        }
    }
}

/// Consolidation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Items not accessed for this many days count as stale
    pub stale_after_days: i64,

    /// Stale items in one category before it is queued for summarization
    pub stale_queue_threshold: usize,

    /// Active items in one category before it is split
    pub max_category_items: usize,

    /// Target cluster count requested when splitting
    pub split_target_clusters: usize,

    /// Items sent to the summarization contract per category
    pub summary_item_limit: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            stale_after_days: 90,
            stale_queue_threshold: 100,
            max_category_items: 50,
            split_target_clusters: 3,
            summary_item_limit: 20,
        }
    }
}

/// Semantic triple layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriplesConfig {
    /// Extract, store and search subject-predicate-object triples
    pub enabled: bool,

    /// Triples fetched per query
    pub search_limit: usize,

    /// Minimum cosine similarity for a triple hit
    pub min_score: f32,

    /// Distinct triple statements quoted in the context
    pub context_statements: usize,
}

impl Default for TriplesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            search_limit: 15,
            min_score: 0.4,
            context_statements: 5,
        }
    }
}

/// Proactive context prediction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Recently accessed items analysed for patterns
    pub recent_items: usize,

    /// Active categories memories are preloaded from
    pub preload_categories: usize,

    /// Items preloaded per category
    pub items_per_category: usize,

    /// Preloaded memories quoted in the context
    pub memory_lines: usize,

    /// Characters kept per quoted memory
    pub memory_line_chars: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            recent_items: 10,
            preload_categories: 3,
            items_per_category: 3,
            memory_lines: 5,
            memory_line_chars: 100,
        }
    }
}

/// Capability call policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Timeout for extraction, judgment, rewrite and summarization calls
    pub completion_timeout_secs: u64,

    /// Timeout for embedding calls
    pub embedding_timeout_secs: u64,

    /// Timeout for deep-mode reasoning
    pub reasoning_timeout_secs: u64,

    /// Attempts per call, including the first
    pub max_attempts: u32,

    /// First backoff delay
    pub backoff_base_ms: u64,

    /// Backoff ceiling
    pub backoff_max_ms: u64,

    /// Entries kept in the embedding cache (0 disables it)
    pub embedding_cache_capacity: usize,
}

impl CapabilityConfig {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_secs(self.reasoning_timeout_secs)
    }
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            completion_timeout_secs: 15,
            embedding_timeout_secs: 10,
            reasoning_timeout_secs: 60,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5000,
            embedding_cache_capacity: 2048,
        }
    }
}

/// Conversation session buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Estimated tokens that trigger a flush
    pub flush_threshold_tokens: usize,

    /// Characters per estimated token
    pub chars_per_token: usize,

    /// Messages quoted as context for query evolution
    pub recent_context_messages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flush_threshold_tokens: 4000,
            chars_per_token: 2,
            recent_context_messages: 6,
        }
    }
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API base URL
    pub base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Chat completion model
    pub chat_model: String,

    /// Embedding model
    pub embedding_model: String,

    /// Embedding dimensionality
    pub dimension: usize,
}

impl ProviderConfig {
    /// Resolve the API key from `MNEMOS_API_KEY`, then `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var("MNEMOS_API_KEY")
            .or_else(|_| std::env::var(&self.api_key_env))
            .or_else(|_| std::env::var(self.api_key_env.to_uppercase()))
            .ok()
            .filter(|k| !k.is_empty())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            dimension: 1536,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for the snapshot and the mirror
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Fact store snapshot file
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("facts.json")
    }

    /// Markdown mirror root
    pub fn vault_dir(&self) -> PathBuf {
        self.data_dir.join("vault")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs_next::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mnemos");
        Self { data_dir: base }
    }
}
