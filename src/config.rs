//! Configuration for the extraction engine.
//!
//! All knobs are optional with defaults; invalid combinations are rejected
//! up front by [`ExtractorConfig::validate`] so that a misconfigured engine
//! never reaches the backend. Values can be layered from an optional file
//! and `LEXEXTRACT_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::exceptions::{ExtractError, ExtractResult};

/// How near-duplicate entities are collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupMode {
    /// Identity-key equality only.
    Exact,
    /// Identity-key equality plus normalized-edit-distance merging.
    Fuzzy,
    /// Reserved; rejected by validation.
    Semantic,
}

/// Sampling and dedup knobs for the extraction waves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Sampling temperature for entity waves. Reproducibility contract: 0.0.
    pub entity_temperature: f32,
    /// Sampling temperature for the relationship wave.
    pub relationship_temperature: f32,
    /// Sampling seed shared by all waves.
    pub seed: u64,
    /// Relationships below this confidence are dropped.
    pub relationship_confidence_floor: f64,
    /// Dedup mode for entities.
    pub dedup_mode: DedupMode,
    /// Similarity threshold for fuzzy dedup; 0.0 disables the fuzzy pass.
    pub dedup_similarity_threshold: f64,
    /// Characters of surrounding context attached to each entity.
    pub context_window_chars: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            entity_temperature: 0.0,
            relationship_temperature: 0.0,
            seed: 42,
            relationship_confidence_floor: 0.85,
            dedup_mode: DedupMode::Exact,
            dedup_similarity_threshold: 0.0,
            context_window_chars: 50,
        }
    }
}

/// Router size thresholds, in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    pub size_threshold_very_small: usize,
    pub size_threshold_small: usize,
    pub size_threshold_medium: usize,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            size_threshold_very_small: 5_000,
            size_threshold_small: 50_000,
            size_threshold_medium: 150_000,
        }
    }
}

/// Chunker sizing and fan-out knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Upper bound on chunk size in characters.
    pub chunk_max_chars: usize,
    /// Lower bound on chunk size in characters (last chunk may be smaller).
    pub chunk_min_chars: usize,
    /// Characters of word-aligned overlap between adjacent chunks.
    pub chunk_overlap_chars: usize,
    /// Hard cap on chunks per document.
    pub max_chunks_per_document: usize,
    /// Bounded fan-out for concurrent chunk processing.
    pub max_concurrent_chunks: usize,
    /// Model context window used by the sizing formula, in tokens.
    pub context_window_tokens: usize,
    /// Fraction of the context window usable for document text.
    pub safety_fraction: f64,
    /// Tokens reserved for the fixed prompt template and type definitions.
    pub fixed_overhead_tokens: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_max_chars: 10_000,
            chunk_min_chars: 1_000,
            chunk_overlap_chars: 500,
            max_chunks_per_document: 100,
            max_concurrent_chunks: 5,
            context_window_tokens: 131_072,
            safety_fraction: 0.8,
            fixed_overhead_tokens: 2_000,
        }
    }
}

/// Backend endpoints and resource envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// Instruct service (entity waves), OpenAI-compatible `/v1` base URL.
    pub instruct_url: String,
    pub instruct_model: String,
    /// Thinking service (relationship wave).
    pub thinking_url: String,
    pub thinking_model: String,
    /// Embeddings service (not used by the extraction core).
    pub embeddings_url: String,
    pub embeddings_model: String,

    /// Total model context budget (prompt + completion), in tokens.
    pub max_model_context_tokens: usize,
    /// Maximum completion tokens requested per call.
    pub max_completion_tokens: usize,
    /// Fast token estimate: characters per token.
    pub chars_per_token: f64,
    /// Multiplier applied to the fast estimate for legal-register text.
    pub legal_token_multiplier: f64,
    /// Use the BPE tokenizer instead of the character heuristic.
    pub use_accurate_tokenizer: bool,

    pub top_p: f32,
    pub top_k: i32,

    /// Per-HTTP-request timeout in seconds.
    pub request_timeout_seconds: u64,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub backoff_max_seconds: f64,
    /// Backend semaphore width.
    pub max_concurrent_requests: usize,
    /// Leaky-bucket ceiling; 0 disables rate limiting.
    pub requests_per_minute: u32,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_recovery_timeout: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            instruct_url: "http://localhost:8080/v1".to_string(),
            instruct_model: "qwen-instruct-384k".to_string(),
            thinking_url: "http://localhost:8082/v1".to_string(),
            thinking_model: "qwen-thinking-256k".to_string(),
            embeddings_url: "http://localhost:8081/v1".to_string(),
            embeddings_model: "jina-embeddings-v4".to_string(),
            max_model_context_tokens: 131_072,
            max_completion_tokens: 8_192,
            chars_per_token: 4.0,
            legal_token_multiplier: 1.1,
            use_accurate_tokenizer: false,
            top_p: 0.95,
            top_k: 40,
            request_timeout_seconds: 300,
            max_retries: 3,
            backoff_factor: 2.0,
            backoff_max_seconds: 30.0,
            max_concurrent_requests: 8,
            requests_per_minute: 120,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_recovery_timeout: 60,
        }
    }
}

/// Pattern-catalog endpoint and cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSettings {
    /// Base catalog URL; `?format=detailed` is appended on fetch.
    /// Empty disables catalog fetches (prompts fall back to no examples).
    pub catalog_url: String,
    pub patterns_cache_ttl_seconds: u64,
    /// Per-fetch timeout in seconds.
    pub fetch_timeout_seconds: u64,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            catalog_url: String::new(),
            patterns_cache_ttl_seconds: 3_600,
            fetch_timeout_seconds: 5,
        }
    }
}

/// GPU-pressure monitoring knobs. Best-effort: a missing query tool is
/// not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuSettings {
    pub enabled: bool,
    pub gpu_id: u32,
    /// Memory utilization fraction that triggers alerts.
    pub gpu_memory_threshold: f64,
    pub poll_interval_seconds: u64,
    /// Reject new requests while over threshold.
    pub reject_on_pressure: bool,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            gpu_id: 0,
            gpu_memory_threshold: 0.90,
            poll_interval_seconds: 30,
            reject_on_pressure: false,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub extraction: ExtractionSettings,
    pub routing: RoutingSettings,
    pub chunking: ChunkingSettings,
    pub inference: InferenceSettings,
    pub patterns: PatternSettings,
    pub gpu: GpuSettings,
    /// Optional directory of prompt template overrides.
    pub prompts_dir: Option<String>,
    /// Per-wave (and per-chunk) timeout in seconds; 0 disables.
    pub wave_timeout_seconds: u64,
    /// Overall extraction deadline in seconds; 0 disables.
    pub extraction_deadline_seconds: u64,
}

impl ExtractorConfig {
    /// Layer defaults, an optional config file (`LEXEXTRACT_CONFIG`), and
    /// `LEXEXTRACT_*` environment variables, then validate.
    pub fn from_env() -> ExtractResult<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var("LEXEXTRACT_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("LEXEXTRACT")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ExtractError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject out-of-range values before any work starts.
    pub fn validate(&self) -> ExtractResult<()> {
        let e = &self.extraction;
        if !(0.0..=1.0).contains(&e.relationship_confidence_floor) {
            return Err(ExtractError::Config(format!(
                "relationship_confidence_floor must be in [0, 1], got {}",
                e.relationship_confidence_floor
            )));
        }
        if !(0.0..=1.0).contains(&e.dedup_similarity_threshold) {
            return Err(ExtractError::Config(format!(
                "dedup_similarity_threshold must be in [0, 1], got {}",
                e.dedup_similarity_threshold
            )));
        }
        if e.dedup_mode == DedupMode::Semantic {
            return Err(ExtractError::Config(
                "semantic dedup is not supported; use exact or fuzzy".to_string(),
            ));
        }
        if !(e.entity_temperature >= 0.0) || !(e.relationship_temperature >= 0.0) {
            return Err(ExtractError::Config("temperatures must be >= 0".to_string()));
        }

        let r = &self.routing;
        if r.size_threshold_very_small == 0
            || r.size_threshold_small <= r.size_threshold_very_small
            || r.size_threshold_medium <= r.size_threshold_small
        {
            return Err(ExtractError::Config(format!(
                "size thresholds must be strictly increasing: {} < {} < {}",
                r.size_threshold_very_small, r.size_threshold_small, r.size_threshold_medium
            )));
        }

        let c = &self.chunking;
        if c.chunk_min_chars == 0 || c.chunk_max_chars <= c.chunk_min_chars {
            return Err(ExtractError::Config(format!(
                "chunk size bounds invalid: min {} max {}",
                c.chunk_min_chars, c.chunk_max_chars
            )));
        }
        if c.chunk_overlap_chars >= c.chunk_min_chars {
            return Err(ExtractError::Config(format!(
                "chunk_overlap_chars ({}) must be smaller than chunk_min_chars ({})",
                c.chunk_overlap_chars, c.chunk_min_chars
            )));
        }
        if c.max_chunks_per_document == 0 || c.max_concurrent_chunks == 0 {
            return Err(ExtractError::Config(
                "max_chunks_per_document and max_concurrent_chunks must be positive".to_string(),
            ));
        }
        if !(0.0 < c.safety_fraction && c.safety_fraction <= 1.0) {
            return Err(ExtractError::Config(format!(
                "safety_fraction must be in (0, 1], got {}",
                c.safety_fraction
            )));
        }

        let i = &self.inference;
        if i.max_completion_tokens == 0 || i.max_completion_tokens >= i.max_model_context_tokens {
            return Err(ExtractError::Config(format!(
                "max_completion_tokens ({}) must be positive and below \
                 max_model_context_tokens ({})",
                i.max_completion_tokens, i.max_model_context_tokens
            )));
        }
        if i.chars_per_token <= 0.0 || i.legal_token_multiplier <= 0.0 {
            return Err(ExtractError::Config(
                "chars_per_token and legal_token_multiplier must be positive".to_string(),
            ));
        }
        if i.max_concurrent_requests == 0 {
            return Err(ExtractError::Config(
                "max_concurrent_requests must be positive".to_string(),
            ));
        }
        if i.backoff_factor < 1.0 {
            return Err(ExtractError::Config(format!(
                "backoff_factor must be >= 1, got {}",
                i.backoff_factor
            )));
        }
        if i.circuit_breaker_failure_threshold == 0 {
            return Err(ExtractError::Config(
                "circuit_breaker_failure_threshold must be positive".to_string(),
            ));
        }

        let g = &self.gpu;
        if !(0.0..=1.0).contains(&g.gpu_memory_threshold) {
            return Err(ExtractError::Config(format!(
                "gpu_memory_threshold must be in [0, 1], got {}",
                g.gpu_memory_threshold
            )));
        }

        Ok(())
    }

    /// Prompt-token budget left after reserving completion space.
    pub fn max_prompt_tokens(&self) -> usize {
        self.inference
            .max_model_context_tokens
            .saturating_sub(self.inference.max_completion_tokens)
    }
}
