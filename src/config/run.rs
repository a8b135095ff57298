//! Per-request run configuration.

use serde::{Deserialize, Serialize};

/// Upper bound on `max_query_expansions`; each variant costs a retrieval
/// pass, so there is no legitimate use for more.
pub const MAX_QUERY_EXPANSIONS: usize = 16;

/// Caller-supplied options for a single pipeline run.
///
/// Every field has a documented default; `validate` is called once at the
/// pipeline entry point so downstream stages can trust the values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Whether the teacher (high-capability) tier may be called. Default: true.
    pub enable_teacher_tier: bool,
    /// Whether the student (low-cost) tier may be called. Default: true.
    pub enable_student_tier: bool,
    /// Maximum number of expanded sub-queries, original included, at most
    /// [`MAX_QUERY_EXPANSIONS`]. Default: 4.
    pub max_query_expansions: usize,
    /// Maximum verifier refinement passes. Default: 3.
    pub max_verification_iterations: u32,
    /// Per-request cost ceiling in USD. Default: 0.50.
    pub cost_ceiling_usd: f64,
    /// Whether the response cache is consulted and populated. Default: true.
    pub cache_enabled: bool,
    /// Number of context items to retrieve. Default: 5.
    pub context_top_k: usize,
    /// Request deadline in milliseconds. Before a first draft exists expiry
    /// is an error; afterwards it cuts refinement short and the best-seen
    /// draft is returned. Default: 120 000.
    pub request_timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            enable_teacher_tier: true,
            enable_student_tier: true,
            max_query_expansions: 4,
            max_verification_iterations: 3,
            cost_ceiling_usd: 0.50,
            cache_enabled: true,
            context_top_k: 5,
            request_timeout_ms: 120_000,
        }
    }
}

impl RunConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] when:
    /// - both tiers are disabled
    /// - `max_verification_iterations` is zero
    /// - `max_query_expansions` is zero (element 0 must hold the original)
    ///   or above [`MAX_QUERY_EXPANSIONS`]
    /// - `cost_ceiling_usd` is not a positive finite number
    pub fn validate(&self) -> crate::Result<()> {
        if !self.enable_teacher_tier && !self.enable_student_tier {
            return Err(crate::Error::InvalidInput(
                "at least one model tier must be enabled".to_string(),
            ));
        }
        if self.max_verification_iterations == 0 {
            return Err(crate::Error::InvalidInput(
                "max_verification_iterations must be at least 1".to_string(),
            ));
        }
        if self.max_query_expansions == 0 || self.max_query_expansions > MAX_QUERY_EXPANSIONS {
            return Err(crate::Error::InvalidInput(format!(
                "max_query_expansions must be between 1 and {MAX_QUERY_EXPANSIONS}"
            )));
        }
        if !self.cost_ceiling_usd.is_finite() || self.cost_ceiling_usd <= 0.0 {
            return Err(crate::Error::InvalidInput(
                "cost_ceiling_usd must be a positive number".to_string(),
            ));
        }
        Ok(())
    }

    /// The fields of this config that affect the produced answer, serialized
    /// for cache keying. Fields that only affect cost or latency (ceiling,
    /// timeout, cache flag) are deliberately excluded so they do not
    /// fragment the cache.
    #[must_use]
    pub fn cache_key_fields(&self) -> String {
        format!(
            "teacher={};student={};expansions={};iterations={};top_k={}",
            self.enable_teacher_tier,
            self.enable_student_tier,
            self.max_query_expansions,
            self.max_verification_iterations,
            self.context_top_k,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_both_tiers_disabled_is_invalid() {
        let config = RunConfig {
            enable_teacher_tier: false,
            enable_student_tier: false,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_iterations_is_invalid() {
        let config = RunConfig {
            max_verification_iterations: 0,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expansion_count_is_bounded() {
        let config = RunConfig {
            max_query_expansions: MAX_QUERY_EXPANSIONS + 1,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RunConfig {
            max_query_expansions: MAX_QUERY_EXPANSIONS,
            ..RunConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_key_fields_ignore_budget() {
        let a = RunConfig::default();
        let b = RunConfig {
            cost_ceiling_usd: 9.0,
            request_timeout_ms: 5,
            cache_enabled: false,
            ..RunConfig::default()
        };
        assert_eq!(a.cache_key_fields(), b.cache_key_fields());
    }
}
