//! # Axon
//!
//! An adaptive query routing and synthesis engine for LLM applications.
//!
//! Axon answers natural-language queries by routing them across a cheap
//! student-tier model and an expensive teacher-tier model, enriching the
//! prompt with retrieved strategy/memory context, and iteratively verifying
//! the draft answer until it converges or the request budget runs out.
//!
//! ## Features
//!
//! - Calibrated difficulty estimation with versioned, swappable snapshots
//! - Budget-aware teacher/student routing with automatic fallback
//! - Singleflight response cache (LRU + TTL, per-key in-flight dedup)
//! - Multi-query expansion fused with reciprocal rank fusion
//! - Bounded confidence-convergence verification loop
//! - Outcome recording that feeds retrieval quality and recalibration
//!
//! ## Example
//!
//! ```rust,ignore
//! use axon::{Pipeline, RunConfig};
//!
//! let pipeline = Pipeline::builder()
//!     .config(config)
//!     .teacher(teacher_tier)
//!     .student(student_tier)
//!     .build();
//! let result = pipeline.execute("What is 2+2?", "math", RunConfig::default()).await?;
//! println!("{}", result.answer);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cache;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod estimator;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod recorder;
pub mod retrieval;
pub mod router;
pub mod store;
pub mod synthesis;
pub mod tier;
pub mod verifier;

// Re-exports for convenience
pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use config::{AxonConfig, RunConfig};
pub use embedding::Embedder;
pub use estimator::{Calibration, CalibrationSnapshot, DifficultyEstimator};
pub use models::{
    ContextItem, ContextItemId, DifficultyAssessment, QueryRequest, RunMetadata, RunResult, Tier,
};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use recorder::OutcomeRecorder;
pub use retrieval::{ContextRetriever, QueryExpander};
pub use router::{ModelRouter, RoutingDecision};
pub use store::{ContextStore, MemoryStore};
pub use synthesis::{Candidate, Synthesizer};
pub use tier::{ModelTier, TierRequest, TierResponse};
pub use verifier::{IterativeVerifier, VerifierOutcome};

/// Error type for axon operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty query, malformed config values, zero-iteration verifier limits |
/// | `EstimationFailed` | Difficulty calibration cannot score the query (absorbed with an assume-hard default) |
/// | `TierFailed` | A single model tier call failed (timeout, HTTP error, rate limit) |
/// | `AllTiersFailed` | Both the primary and fallback tiers failed for one generation |
/// | `BudgetExceeded` | The cheapest enabled tier still exceeds the caller's cost ceiling |
/// | `StageTimeout` | A pipeline stage exceeded its deadline |
/// | `OperationFailed` | Store I/O, config parsing, and other infrastructure failures |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - The query text is empty or whitespace-only
    /// - `RunConfig` validation fails (both tiers disabled, zero `top_k`, ...)
    /// - A config file contains out-of-range values
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Difficulty estimation failed.
    ///
    /// Non-fatal: the pipeline absorbs this and proceeds with a conservative
    /// assume-hard assessment so routing is biased toward the teacher tier.
    #[error("difficulty estimation failed: {0}")]
    EstimationFailed(String),

    /// A single model tier call failed.
    ///
    /// Raised when:
    /// - The tier endpoint times out or refuses the connection
    /// - The tier returns a non-success HTTP status (including rate limits)
    /// - The response body cannot be decoded
    #[error("{tier} tier failed: {cause}")]
    TierFailed {
        /// Which tier failed.
        tier: Tier,
        /// The underlying cause.
        cause: String,
    },

    /// Both tiers failed for the same generation.
    ///
    /// Terminal: returned only after the fallback retry was attempted.
    #[error("all tiers failed (primary {primary}: {primary_cause}; fallback {fallback}: {fallback_cause})")]
    AllTiersFailed {
        /// The tier tried first.
        primary: Tier,
        /// Why the primary tier failed.
        primary_cause: String,
        /// The tier tried second.
        fallback: Tier,
        /// Why the fallback tier failed.
        fallback_cause: String,
    },

    /// The request budget cannot cover even the cheapest enabled tier.
    #[error("budget exceeded: cheapest tier costs ~${estimated_usd:.4} but ceiling is ${ceiling_usd:.4}")]
    BudgetExceeded {
        /// Estimated cost of the cheapest enabled path.
        estimated_usd: f64,
        /// The caller-supplied cost ceiling.
        ceiling_usd: f64,
    },

    /// A pipeline stage exceeded its deadline.
    #[error("stage '{stage}' timed out after {elapsed_ms}ms")]
    StageTimeout {
        /// The stage that timed out.
        stage: &'static str,
        /// Elapsed milliseconds when the deadline fired.
        elapsed_ms: u64,
    },

    /// An operation failed.
    ///
    /// Raised when:
    /// - Context store reads/writes fail
    /// - Config file I/O or TOML parsing fails
    /// - Embedding fails for a non-empty input
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns `true` for failures the pipeline absorbs with a safe default
    /// instead of propagating to the caller.
    #[must_use]
    pub const fn is_absorbable(&self) -> bool {
        matches!(self, Self::EstimationFailed(_))
    }
}

/// Result type alias for axon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Centralized so timestamp handling stays in one place. Uses
/// `SystemTime::now()` with fallback to 0 if the system clock is before the
/// Unix epoch.
///
/// # Examples
///
/// ```rust
/// use axon::current_timestamp;
///
/// let ts = current_timestamp();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("empty query".to_string());
        assert_eq!(err.to_string(), "invalid input: empty query");

        let err = Error::TierFailed {
            tier: Tier::Teacher,
            cause: "503".to_string(),
        };
        assert_eq!(err.to_string(), "teacher tier failed: 503");

        let err = Error::StageTimeout {
            stage: "retrieve",
            elapsed_ms: 250,
        };
        assert_eq!(err.to_string(), "stage 'retrieve' timed out after 250ms");
    }

    #[test]
    fn test_absorbable_errors() {
        assert!(Error::EstimationFailed("x".into()).is_absorbable());
        assert!(!Error::InvalidInput("x".into()).is_absorbable());
        assert!(
            !Error::BudgetExceeded {
                estimated_usd: 0.2,
                ceiling_usd: 0.1
            }
            .is_absorbable()
        );
    }
}
