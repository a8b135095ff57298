//! Configuration management.

mod run;

pub use run::{MAX_QUERY_EXPANSIONS, RunConfig};

use crate::models::Tier;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration for axon.
#[derive(Debug, Clone)]
pub struct AxonConfig {
    /// Path to the data directory.
    pub data_dir: PathBuf,
    /// Teacher-tier settings.
    pub teacher: TierSettings,
    /// Student-tier settings.
    pub student: TierSettings,
    /// Routing settings.
    pub routing: RoutingSettings,
    /// Response-cache settings.
    pub cache: CacheSettings,
    /// Verifier settings.
    pub verifier: VerifierSettings,
    /// Retrieval settings.
    pub retrieval: RetrievalSettings,
}

/// Per-tier model endpoint settings.
#[derive(Debug, Clone)]
pub struct TierSettings {
    /// Model name passed to the provider.
    pub model: String,
    /// Base URL for the provider endpoint.
    pub base_url: Option<String>,
    /// API key (may be an environment variable reference like `${OPENAI_API_KEY}`).
    pub api_key: Option<String>,
    /// Estimated cost in USD per 1k tokens, used for budget enforcement.
    pub cost_per_1k_tokens_usd: f64,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl TierSettings {
    /// Default settings for the given tier.
    #[must_use]
    pub fn defaults_for(tier: Tier) -> Self {
        match tier {
            Tier::Teacher => Self {
                model: "gpt-4o".to_string(),
                base_url: None,
                api_key: None,
                cost_per_1k_tokens_usd: 0.01,
                max_tokens: 1024,
                timeout_ms: 60_000,
            },
            Tier::Student => Self {
                model: "llama3.2".to_string(),
                base_url: None,
                api_key: None,
                cost_per_1k_tokens_usd: 0.0002,
                max_tokens: 1024,
                timeout_ms: 30_000,
            },
        }
    }

    /// Estimated cost in USD for one completion at `max_tokens`.
    #[must_use]
    pub fn estimated_call_cost_usd(&self) -> f64 {
        self.cost_per_1k_tokens_usd * f64::from(self.max_tokens) / 1000.0
    }

    /// Resolves the API key, expanding `${VAR}` environment references.
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        let raw = self.api_key.as_deref()?;
        if let Some(var) = raw.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            std::env::var(var).ok()
        } else {
            Some(raw.to_string())
        }
    }
}

/// Routing policy settings.
#[derive(Debug, Clone)]
pub struct RoutingSettings {
    /// Difficulty above which the teacher tier becomes the preferred primary.
    pub difficulty_threshold: f64,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            difficulty_threshold: 0.6,
        }
    }
}

/// Response-cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Maximum number of entries before LRU eviction.
    pub max_size: usize,
    /// Entry time-to-live in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 1024,
            ttl_secs: 3600,
        }
    }
}

/// Iterative-verifier settings.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Confidence at or above which the loop converges.
    pub convergence_threshold: f64,
    /// Minimum confidence improvement per iteration; below this the loop
    /// is considered plateaued and converges.
    pub min_delta: f64,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            convergence_threshold: 0.85,
            min_delta: 0.01,
        }
    }
}

/// Context-retrieval settings.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    /// Minimum similarity score for a retrieved item to be kept.
    pub min_similarity: f32,
    /// Usage threshold before an item becomes eligible for pruning.
    pub prune_min_uses: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            min_similarity: 0.1,
            prune_min_uses: 10,
        }
    }
}

/// Default data directory: the platform data dir, or `.axon` in the current
/// directory when the platform dirs are unavailable.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".axon"),
        |dirs| dirs.data_dir().join("axon"),
    )
}

/// Default config file location (`<config dir>/axon/config.toml`), if the
/// platform config dir is known.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("axon").join("config.toml"))
}

impl Default for AxonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            teacher: TierSettings::defaults_for(Tier::Teacher),
            student: TierSettings::defaults_for(Tier::Student),
            routing: RoutingSettings::default(),
            cache: CacheSettings::default(),
            verifier: VerifierSettings::default(),
            retrieval: RetrievalSettings::default(),
        }
    }
}

impl AxonConfig {
    /// Loads configuration from a TOML file, applying environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
            operation: "config_load".to_string(),
            cause: format!("failed to read {}: {e}", path.display()),
        })?;
        let file: ConfigFile =
            toml::from_str(&content).map_err(|e| crate::Error::OperationFailed {
                operation: "config_load".to_string(),
                cause: format!("failed to parse {}: {e}", path.display()),
            })?;
        Ok(Self::from_file(file).with_env_overrides())
    }

    /// Loads configuration from the given path, or from the default config
    /// location, falling back to defaults when no config file exists.
    #[must_use]
    pub fn load_or_default(path: Option<&Path>) -> Self {
        if let Some(p) = path {
            return Self::load(p).unwrap_or_else(|e| {
                tracing::warn!("failed to load config, using defaults: {e}");
                Self::default().with_env_overrides()
            });
        }
        if let Some(default_path) = default_config_path() {
            if default_path.exists() {
                if let Ok(config) = Self::load(&default_path) {
                    return config;
                }
            }
        }
        Self::default().with_env_overrides()
    }

    /// Settings for the given tier.
    #[must_use]
    pub const fn tier(&self, tier: Tier) -> &TierSettings {
        match tier {
            Tier::Teacher => &self.teacher,
            Tier::Student => &self.student,
        }
    }

    fn from_file(file: ConfigFile) -> Self {
        let mut config = Self::default();
        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(section) = file.teacher {
            apply_tier_section(&mut config.teacher, section);
        }
        if let Some(section) = file.student {
            apply_tier_section(&mut config.student, section);
        }
        if let Some(routing) = file.routing {
            if let Some(threshold) = routing.difficulty_threshold {
                config.routing.difficulty_threshold = threshold.clamp(0.0, 1.0);
            }
        }
        if let Some(cache) = file.cache {
            if let Some(max_size) = cache.max_size {
                config.cache.max_size = max_size.max(1);
            }
            if let Some(ttl_secs) = cache.ttl_secs {
                config.cache.ttl_secs = ttl_secs;
            }
        }
        if let Some(verifier) = file.verifier {
            if let Some(threshold) = verifier.convergence_threshold {
                config.verifier.convergence_threshold = threshold.clamp(0.0, 1.0);
            }
            if let Some(min_delta) = verifier.min_delta {
                config.verifier.min_delta = min_delta.max(0.0);
            }
        }
        if let Some(retrieval) = file.retrieval {
            if let Some(min_similarity) = retrieval.min_similarity {
                config.retrieval.min_similarity = min_similarity.clamp(0.0, 1.0);
            }
            if let Some(prune_min_uses) = retrieval.prune_min_uses {
                config.retrieval.prune_min_uses = prune_min_uses;
            }
        }
        config
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("AXON_DIFFICULTY_THRESHOLD") {
            if let Ok(parsed) = v.parse::<f64>() {
                self.routing.difficulty_threshold = parsed.clamp(0.0, 1.0);
            }
        }
        if let Ok(v) = std::env::var("AXON_CACHE_MAX_SIZE") {
            if let Ok(parsed) = v.parse::<usize>() {
                self.cache.max_size = parsed.max(1);
            }
        }
        if let Ok(v) = std::env::var("AXON_CACHE_TTL_SECS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.cache.ttl_secs = parsed;
            }
        }
        if let Ok(v) = std::env::var("AXON_TEACHER_MODEL") {
            self.teacher.model = v;
        }
        if let Ok(v) = std::env::var("AXON_STUDENT_MODEL") {
            self.student.model = v;
        }
        self
    }
}

fn apply_tier_section(settings: &mut TierSettings, section: ConfigFileTier) {
    if let Some(model) = section.model {
        settings.model = model;
    }
    if let Some(base_url) = section.base_url {
        settings.base_url = Some(base_url);
    }
    if let Some(api_key) = section.api_key {
        settings.api_key = Some(api_key);
    }
    if let Some(cost) = section.cost_per_1k_tokens_usd {
        settings.cost_per_1k_tokens_usd = cost.max(0.0);
    }
    if let Some(max_tokens) = section.max_tokens {
        settings.max_tokens = max_tokens.max(1);
    }
    if let Some(timeout_ms) = section.timeout_ms {
        settings.timeout_ms = timeout_ms;
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Teacher-tier section.
    pub teacher: Option<ConfigFileTier>,
    /// Student-tier section.
    pub student: Option<ConfigFileTier>,
    /// Routing section.
    pub routing: Option<ConfigFileRouting>,
    /// Cache section.
    pub cache: Option<ConfigFileCache>,
    /// Verifier section.
    pub verifier: Option<ConfigFileVerifier>,
    /// Retrieval section.
    pub retrieval: Option<ConfigFileRetrieval>,
}

/// Tier section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileTier {
    /// Model name.
    pub model: Option<String>,
    /// Base URL.
    pub base_url: Option<String>,
    /// API key.
    pub api_key: Option<String>,
    /// Cost per 1k tokens in USD.
    pub cost_per_1k_tokens_usd: Option<f64>,
    /// Max completion tokens.
    pub max_tokens: Option<u32>,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Routing section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRouting {
    /// Difficulty threshold.
    pub difficulty_threshold: Option<f64>,
}

/// Cache section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCache {
    /// Max entries.
    pub max_size: Option<usize>,
    /// TTL in seconds.
    pub ttl_secs: Option<u64>,
}

/// Verifier section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileVerifier {
    /// Convergence threshold.
    pub convergence_threshold: Option<f64>,
    /// Minimum per-iteration improvement.
    pub min_delta: Option<f64>,
}

/// Retrieval section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRetrieval {
    /// Minimum similarity score.
    pub min_similarity: Option<f32>,
    /// Prune usage threshold.
    pub prune_min_uses: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_file() {
        let toml_str = r#"
            data_dir = "/tmp/axon"

            [teacher]
            model = "gpt-4o-mini"
            cost_per_1k_tokens_usd = 0.005

            [routing]
            difficulty_threshold = 0.7

            [cache]
            max_size = 64
            ttl_secs = 120
        "#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = AxonConfig::from_file(file);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/axon"));
        assert_eq!(config.teacher.model, "gpt-4o-mini");
        assert!((config.routing.difficulty_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.cache.max_size, 64);
        assert_eq!(config.cache.ttl_secs, 120);
        // Untouched sections keep defaults.
        assert_eq!(config.student.model, "llama3.2");
    }

    #[test]
    fn test_threshold_is_clamped() {
        let file: ConfigFile = toml::from_str("[routing]\ndifficulty_threshold = 3.5").unwrap();
        let config = AxonConfig::from_file(file);
        assert!((config.routing.difficulty_threshold - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_estimated_call_cost() {
        let settings = TierSettings {
            cost_per_1k_tokens_usd: 0.01,
            max_tokens: 500,
            ..TierSettings::defaults_for(Tier::Teacher)
        };
        assert!((settings.estimated_call_cost_usd() - 0.005).abs() < 1e-12);
    }
}
