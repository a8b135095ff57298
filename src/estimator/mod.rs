//! Query difficulty estimation.
//!
//! Maps lexical query features through a calibrated logistic scoring function
//! to a difficulty score and per-tier expected accuracies. Deterministic for
//! a given calibration snapshot so routing decisions are reproducible; the
//! snapshot is versioned and swappable without changing the calling contract.

mod calibration;

pub use calibration::{Calibration, CalibrationSnapshot, TierCurve};

use crate::models::{ConfidenceInterval, DifficultyAssessment, Tier};
use crate::{Error, Result};
use std::sync::RwLock;

/// Lexical features extracted from a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryFeatures {
    /// Query length, saturated into [0, 1] (~60 words saturates).
    pub length: f64,
    /// Share of tokens longer than 7 characters.
    pub rare_token_ratio: f64,
    /// Presence of reasoning markers ("prove", "derive", "why", ...).
    pub reasoning_markers: f64,
    /// Familiarity of the domain in [0, 1]; 0 for unseen domains.
    pub domain_familiarity: f64,
}

const REASONING_MARKERS: &[&str] = &[
    "why", "how", "prove", "derive", "explain", "compare", "optimize", "design", "trade-off",
    "tradeoff", "step",
];

impl QueryFeatures {
    /// Extracts features from query text, using the snapshot's domain
    /// frequency table for familiarity.
    #[must_use]
    pub fn extract(text: &str, domain: &str, snapshot: &CalibrationSnapshot) -> Self {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|t| !t.is_empty())
            .collect();
        let token_count = tokens.len();

        #[allow(clippy::cast_precision_loss)]
        let length = (token_count as f64 / 60.0).min(1.0);

        let rare = tokens.iter().filter(|t| t.len() > 7).count();
        #[allow(clippy::cast_precision_loss)]
        let rare_token_ratio = if token_count == 0 {
            0.0
        } else {
            rare as f64 / token_count as f64
        };

        let marker_hits = REASONING_MARKERS
            .iter()
            .filter(|m| tokens.contains(*m))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let reasoning_markers = (marker_hits as f64 / 2.0).min(1.0);

        Self {
            length,
            rare_token_ratio,
            reasoning_markers,
            domain_familiarity: snapshot.domain_familiarity(domain),
        }
    }
}

/// Difficulty estimator over a swappable calibration snapshot.
pub struct DifficultyEstimator {
    snapshot: RwLock<CalibrationSnapshot>,
}

impl DifficultyEstimator {
    /// Creates an estimator with the default calibration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_snapshot(CalibrationSnapshot::default())
    }

    /// Creates an estimator with a specific calibration snapshot.
    #[must_use]
    pub const fn with_snapshot(snapshot: CalibrationSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Replaces the calibration snapshot.
    pub fn swap_snapshot(&self, snapshot: CalibrationSnapshot) {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = snapshot;
    }

    /// Returns a copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CalibrationSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Estimates the difficulty of a query within a domain.
    ///
    /// Unknown domains fall back to the snapshot's domain-agnostic default
    /// familiarity; this never fails the request for that reason.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EstimationFailed`] for degenerate input (empty
    /// query); callers absorb this with [`DifficultyAssessment::assume_hard`].
    pub fn estimate(&self, query_text: &str, domain: &str) -> Result<DifficultyAssessment> {
        if query_text.trim().is_empty() {
            return Err(Error::EstimationFailed(
                "cannot score an empty query".to_string(),
            ));
        }
        let snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let features = QueryFeatures::extract(query_text, domain, &snapshot);
        let difficulty = snapshot.difficulty(&features);
        let assessment = DifficultyAssessment {
            difficulty,
            expected_accuracy_teacher: snapshot.expected_accuracy(Tier::Teacher, difficulty),
            expected_accuracy_student: snapshot.expected_accuracy(Tier::Student, difficulty),
            interval: ConfidenceInterval::around(difficulty, snapshot.uncertainty_half_width()),
            calibration_version: snapshot.version,
        };
        tracing::debug!(
            domain = domain,
            difficulty = assessment.difficulty,
            calibration_version = assessment.calibration_version,
            "difficulty estimated"
        );
        Ok(assessment)
    }
}

impl Default for DifficultyEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_is_deterministic() {
        let estimator = DifficultyEstimator::new();
        let a = estimator.estimate("prove the Riemann hypothesis", "math").unwrap();
        let b = estimator.estimate("prove the Riemann hypothesis", "math").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_query_fails_estimation() {
        let estimator = DifficultyEstimator::new();
        assert!(matches!(
            estimator.estimate("  ", "math"),
            Err(Error::EstimationFailed(_))
        ));
    }

    #[test]
    fn test_unknown_domain_does_not_fail() {
        let estimator = DifficultyEstimator::new();
        let assessment = estimator.estimate("what is 2+2?", "never-seen-domain");
        assert!(assessment.is_ok());
    }

    #[test]
    fn test_longer_reasoning_queries_score_harder() {
        let estimator = DifficultyEstimator::new();
        let easy = estimator.estimate("what is 2+2?", "math").unwrap();
        let hard = estimator
            .estimate(
                "derive and prove the asymptotic complexity of a randomized incremental \
                 Delaunay triangulation construction, and explain the backward analysis \
                 argument step by step including degenerate configurations",
                "math",
            )
            .unwrap();
        assert!(hard.difficulty > easy.difficulty);
    }

    #[test]
    fn test_reasoning_markers_are_counted() {
        let snapshot = CalibrationSnapshot::default();
        let none = QueryFeatures::extract("what is the capital of France", "geo", &snapshot);
        assert!((none.reasoning_markers - 0.0).abs() < f64::EPSILON);

        // Two distinct markers saturate the feature at 1.0.
        let two = QueryFeatures::extract("prove and derive the identity", "math", &snapshot);
        assert!((two.reasoning_markers - 1.0).abs() < f64::EPSILON);

        let one = QueryFeatures::extract("explain quicksort", "cs", &snapshot);
        assert!((one.reasoning_markers - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_teacher_accuracy_dominates_student() {
        let estimator = DifficultyEstimator::new();
        let a = estimator.estimate("summarize the plot of Hamlet", "literature").unwrap();
        assert!(a.expected_accuracy_teacher >= a.expected_accuracy_student);
    }

    #[test]
    fn test_swap_snapshot_changes_version() {
        let estimator = DifficultyEstimator::new();
        let before = estimator.estimate("question one two three", "d").unwrap();
        let mut snapshot = estimator.snapshot();
        snapshot.version += 1;
        estimator.swap_snapshot(snapshot);
        let after = estimator.estimate("question one two three", "d").unwrap();
        assert_eq!(after.calibration_version, before.calibration_version + 1);
    }
}
