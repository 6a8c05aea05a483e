//! Configuration management for semdex
//!
//! Loads the TOML configuration, applies profile and environment overrides,
//! validates it, and resolves human-friendly size/duration strings into the
//! typed settings the index and retrieval pipeline run on.

use crate::error::{Result, SemdexError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub tags: TagConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "hashing" or "fastembed"
    pub provider: String,
    pub model: String,
    /// Must match the provider output; a mismatch is fatal
    pub dimension: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            batch_size: 32,
        }
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            overlap_chars: 200,
        }
    }
}

/// Per-user HNSW graph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Slots allocated when a user index is created
    pub initial_capacity: usize,
    /// Growth stops here; further inserts evict the oldest entries
    pub max_capacity: usize,
    pub allow_growth: bool,
    /// HNSW M parameter (number of connections per layer)
    pub hnsw_m: usize,
    /// HNSW construction parameter (higher = better recall, slower build)
    pub hnsw_ef_construction: usize,
    /// Lower bound for the search-time ef
    pub ef_search_floor: usize,
    /// ef scales as k * multiplier above the floor
    pub ef_search_multiplier: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            max_capacity: 200_000,
            allow_growth: true,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            ef_search_floor: 64,
            ef_search_multiplier: 2,
        }
    }
}

/// Index store (registry) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Vectors bulk-loaded (or entries embedded) when warming an index
    pub warm_limit: usize,
    pub idle_ttl: String,
    pub memory_budget: String,
    pub maintenance_interval: String,
    /// Per-node bookkeeping added to the memory estimate
    pub node_overhead_bytes: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            warm_limit: 1000,
            idle_ttl: "30m".to_string(),
            memory_budget: "512MB".to_string(),
            maintenance_interval: "60s".to_string(),
            node_overhead_bytes: 64,
        }
    }
}

/// Progressive retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_query_chars: usize,
    /// Similarity below this counts as a poor match
    pub poor_match_threshold: f32,
    /// Candidates that must clear the threshold (capped at the requested count)
    pub min_good_hits: usize,
    pub max_rounds: usize,
    pub max_duration: String,
    /// Vectors added per backfill round
    pub expansion_batch: usize,
    /// Cap for the doubled search breadth
    pub max_k1: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_query_chars: 2000,
            poor_match_threshold: 0.3,
            min_good_hits: 2,
            max_rounds: 4,
            max_duration: "750ms".to_string(),
            expansion_batch: 200,
            max_k1: 256,
        }
    }
}

/// Tag enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub enabled: bool,
    /// Tag-like terms extracted from a query
    pub max_terms: usize,
    /// Tag hits fetched per query
    pub recent_limit: usize,
    pub boost_per_match: f32,
    pub max_boost: f32,
    /// Similarity assigned to entries found only through tags
    pub tag_only_similarity: f32,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_terms: 8,
            recent_limit: 50,
            boost_per_match: 0.15,
            max_boost: 0.6,
            tag_only_similarity: 0.35,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warm_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_budget: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poor_match_threshold: Option<f32>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SemdexError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| SemdexError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SemdexError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| SemdexError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| SemdexError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(warm_limit) = overrides.warm_limit {
            self.registry.warm_limit = warm_limit;
        }
        if let Some(budget) = overrides.memory_budget {
            self.registry.memory_budget = budget;
        }
        if let Some(rounds) = overrides.max_rounds {
            self.retrieval.max_rounds = rounds;
        }
        if let Some(duration) = overrides.max_duration {
            self.retrieval.max_duration = duration;
        }
        if let Some(threshold) = overrides.poor_match_threshold {
            self.retrieval.poor_match_threshold = threshold;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: SEMDEX_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("SEMDEX_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__DIMENSION" => self.embedding.dimension = parse_env(path, value)?,
            "REGISTRY__WARM_LIMIT" => self.registry.warm_limit = parse_env(path, value)?,
            "REGISTRY__MEMORY_BUDGET" => self.registry.memory_budget = value.to_string(),
            "REGISTRY__IDLE_TTL" => self.registry.idle_ttl = value.to_string(),
            "RETRIEVAL__MAX_DURATION" => self.retrieval.max_duration = value.to_string(),
            "RETRIEVAL__POOR_MATCH_THRESHOLD" => {
                self.retrieval.poor_match_threshold = parse_env(path, value)?
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SemdexError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("semdex").join("config.toml"))
    }

    /// Built-in profiles written by `config init`
    pub fn with_builtin_profiles(mut self) -> Self {
        self.profiles.insert(
            "fast".to_string(),
            ProfileOverrides {
                warm_limit: Some(300),
                max_rounds: Some(1),
                max_duration: Some("200ms".to_string()),
                ..Default::default()
            },
        );
        self.profiles.insert(
            "accuracy".to_string(),
            ProfileOverrides {
                warm_limit: Some(5000),
                max_rounds: Some(8),
                max_duration: Some("3s".to_string()),
                poor_match_threshold: Some(0.4),
                ..Default::default()
            },
        );
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            index: IndexConfig::default(),
            registry: RegistryConfig::default(),
            retrieval: RetrievalConfig::default(),
            tags: TagConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| SemdexError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse a duration string such as "750ms", "5s", "10m", "1h" or bare seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();

    // Check "ms" before "s" because "ms" ends with "s"
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse().ok().map(Duration::from_secs)
    }
}

/// Parse a size string such as "512MB", "1GB", "64KB", "100B" or bare bytes
pub fn parse_size(s: &str) -> Option<u64> {
    let upper = s.trim().to_uppercase();
    let (digits, multiplier) = if let Some(v) = upper.strip_suffix("GB") {
        (v, 1024 * 1024 * 1024)
    } else if let Some(v) = upper.strip_suffix("MB") {
        (v, 1024 * 1024)
    } else if let Some(v) = upper.strip_suffix("KB") {
        (v, 1024)
    } else if let Some(v) = upper.strip_suffix('B') {
        (v, 1)
    } else {
        (upper.as_str(), 1)
    };
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}

fn resolve_duration(path: &str, value: &str) -> Result<Duration> {
    parse_duration(value).ok_or_else(|| SemdexError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Invalid duration format: {}", value),
    })
}

/// Registry settings with sizes and durations resolved
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub warm_limit: usize,
    pub idle_ttl: Duration,
    pub memory_budget_bytes: u64,
    pub maintenance_interval: Duration,
    pub node_overhead_bytes: usize,
}

impl RegistrySettings {
    pub fn resolve(config: &RegistryConfig) -> Result<Self> {
        let memory_budget_bytes =
            parse_size(&config.memory_budget).ok_or_else(|| SemdexError::InvalidConfigValue {
                path: "registry.memory_budget".to_string(),
                message: format!("Invalid size format: {}", config.memory_budget),
            })?;

        Ok(Self {
            warm_limit: config.warm_limit,
            idle_ttl: resolve_duration("registry.idle_ttl", &config.idle_ttl)?,
            memory_budget_bytes,
            maintenance_interval: resolve_duration(
                "registry.maintenance_interval",
                &config.maintenance_interval,
            )?,
            node_overhead_bytes: config.node_overhead_bytes,
        })
    }
}

/// Retrieval settings with the time budget resolved
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub max_query_chars: usize,
    pub poor_match_threshold: f32,
    pub min_good_hits: usize,
    pub max_rounds: usize,
    pub max_duration: Duration,
    pub expansion_batch: usize,
    pub max_k1: usize,
}

impl RetrievalSettings {
    pub fn resolve(config: &RetrievalConfig) -> Result<Self> {
        Ok(Self {
            max_query_chars: config.max_query_chars,
            poor_match_threshold: config.poor_match_threshold,
            min_good_hits: config.min_good_hits,
            max_rounds: config.max_rounds,
            max_duration: resolve_duration("retrieval.max_duration", &config.max_duration)?,
            expansion_batch: config.expansion_batch,
            max_k1: config.max_k1,
        })
    }
}
