//! Iterative answer verification.
//!
//! Runs a bounded refinement loop over a draft answer as an explicit state
//! machine: `Drafting → Scoring → {Converged | Continuing | Exhausted}`.
//! Each pass recomputes a confidence score; the loop stops on convergence
//! (threshold met or improvement plateaued), on `max_iterations`, on budget
//! exhaustion, or on the request deadline. The verifier always returns the
//! best-scoring draft seen across the whole run, never a regressed one.

mod scoring;

pub use scoring::ConfidenceScorer;

use crate::models::RetrievedItem;
use crate::{Error, Result};
use std::time::Instant;

/// Verifier loop parameters.
#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    /// Confidence at or above which the loop converges.
    pub convergence_threshold: f64,
    /// Improvement below which consecutive passes count as a plateau.
    pub min_delta: f64,
    /// Maximum scoring passes.
    pub max_iterations: u32,
}

/// Loop phases; terminal states carry no data, the working state lives in
/// [`VerificationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Scoring,
    Continuing,
    Converged,
    Exhausted,
}

/// Mutable state for one verification run. Created when the loop starts and
/// discarded at the end; only the outcome survives.
#[derive(Debug)]
struct VerificationState {
    draft: String,
    iteration: u32,
    confidence_history: Vec<f64>,
    best_draft: String,
    best_confidence: f64,
}

impl VerificationState {
    fn new(draft: String) -> Self {
        Self {
            best_draft: draft.clone(),
            draft,
            iteration: 0,
            confidence_history: Vec::new(),
            best_confidence: f64::NEG_INFINITY,
        }
    }

    fn record_score(&mut self, confidence: f64) {
        self.iteration += 1;
        self.confidence_history.push(confidence);
        if confidence > self.best_confidence {
            self.best_confidence = confidence;
            self.best_draft = self.draft.clone();
        }
    }

    fn previous_confidence(&self) -> Option<f64> {
        let n = self.confidence_history.len();
        if n < 2 {
            None
        } else {
            self.confidence_history.get(n - 2).copied()
        }
    }
}

/// The result of a verification run.
#[derive(Debug, Clone)]
pub struct VerifierOutcome {
    /// The best-scoring draft seen during the run.
    pub answer: String,
    /// Confidence of the returned draft.
    pub confidence: f64,
    /// Number of scoring passes performed.
    pub iterations: u32,
    /// Whether the loop converged (false: best-seen returned as-is).
    pub converged: bool,
    /// Per-pass confidence scores, in order.
    pub confidence_history: Vec<f64>,
}

/// Bounded confidence-convergence verifier.
pub struct IterativeVerifier {
    config: VerifierConfig,
    scorer: ConfidenceScorer,
}

impl IterativeVerifier {
    /// Creates a verifier.
    #[must_use]
    pub const fn new(config: VerifierConfig) -> Self {
        Self {
            config,
            scorer: ConfidenceScorer::new(),
        }
    }

    /// Runs the refinement loop.
    ///
    /// `refine` is called to request an improved draft from the model layer;
    /// it receives the current draft and must return `Ok(None)` when the
    /// remaining budget does not allow another model call, which terminates
    /// the loop as `Exhausted`. `deadline`, when given, aborts the loop
    /// early with the same best-seen contract.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `max_iterations` is zero.
    /// Refinement failures are absorbed: the loop keeps the best-seen draft
    /// and terminates as `Exhausted`.
    pub async fn verify<F, Fut>(
        &self,
        query: &str,
        initial_draft: String,
        context: &[RetrievedItem],
        deadline: Option<Instant>,
        mut refine: F,
    ) -> Result<VerifierOutcome>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Option<String>>>,
    {
        if self.config.max_iterations == 0 {
            return Err(Error::InvalidInput(
                "verifier requires at least one iteration".to_string(),
            ));
        }

        let mut state = VerificationState::new(initial_draft);
        let mut phase = Phase::Scoring;

        let (converged, state) = loop {
            match phase {
                Phase::Scoring => {
                    let confidence = self.scorer.score(query, &state.draft, context);
                    state.record_score(confidence);
                    tracing::debug!(
                        iteration = state.iteration,
                        confidence,
                        best = state.best_confidence,
                        "verification pass scored"
                    );

                    if confidence >= self.config.convergence_threshold {
                        phase = Phase::Converged;
                    } else if state
                        .previous_confidence()
                        .is_some_and(|prev| confidence - prev < self.config.min_delta)
                    {
                        // Plateaued (or regressed): further refinement is
                        // not paying for itself.
                        phase = Phase::Converged;
                    } else if state.iteration >= self.config.max_iterations {
                        phase = Phase::Exhausted;
                    } else {
                        phase = Phase::Continuing;
                    }
                },
                Phase::Continuing => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        phase = Phase::Exhausted;
                        continue;
                    }
                    match refine(state.draft.clone()).await {
                        Ok(Some(refined)) => {
                            state.draft = refined;
                            phase = Phase::Scoring;
                        },
                        Ok(None) => {
                            // Budget exhausted.
                            phase = Phase::Exhausted;
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "refinement failed; keeping best-seen draft");
                            phase = Phase::Exhausted;
                        },
                    }
                },
                Phase::Converged => break (true, state),
                Phase::Exhausted => break (false, state),
            }
        };

        metrics::histogram!("verifier_iterations").record(f64::from(state.iteration));
        if !converged {
            metrics::counter!("verifier_exhausted_total").increment(1);
        }

        Ok(VerifierOutcome {
            answer: state.best_draft,
            confidence: state.best_confidence,
            iterations: state.iteration,
            converged,
            confidence_history: state.confidence_history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_iterations: u32) -> VerifierConfig {
        VerifierConfig {
            convergence_threshold: 0.99,
            min_delta: 0.0,
            max_iterations,
        }
    }

    #[tokio::test]
    async fn test_single_iteration_terminates_after_one_pass() {
        let verifier = IterativeVerifier::new(config(1));
        let outcome = verifier
            .verify("what is 2+2", "4".to_string(), &[], None, |_| async {
                Ok(Some("refined".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.confidence_history.len(), 1);
    }

    #[tokio::test]
    async fn test_converges_at_threshold() {
        let verifier = IterativeVerifier::new(VerifierConfig {
            convergence_threshold: 0.0,
            min_delta: 0.0,
            max_iterations: 5,
        });
        let outcome = verifier
            .verify("q", "draft".to_string(), &[], None, |_| async {
                Ok(Some("never called".to_string()))
            })
            .await
            .unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn test_returns_best_seen_draft_not_last() {
        let verifier = IterativeVerifier::new(VerifierConfig {
            convergence_threshold: 2.0, // unreachable, force full loop
            min_delta: -1.0,            // never plateau
            max_iterations: 3,
        });
        // First refinement improves coverage, second regresses to junk.
        let drafts = std::sync::Mutex::new(vec![
            "the quick brown fox jumps over the lazy dog".to_string(),
            "zzz".to_string(),
        ]);
        let outcome = verifier
            .verify(
                "quick brown fox jumps",
                "partial quick answer".to_string(),
                &[],
                None,
                |_| {
                    let next = drafts
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .remove(0);
                    async move { Ok(Some(next)) }
                },
            )
            .await
            .unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.answer, "the quick brown fox jumps over the lazy dog");
        // Best-seen confidence equals the max of the history.
        let max = outcome
            .confidence_history
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        assert!((outcome.confidence - max).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_stops_loop() {
        let verifier = IterativeVerifier::new(VerifierConfig {
            convergence_threshold: 2.0,
            min_delta: -1.0,
            max_iterations: 10,
        });
        let outcome = verifier
            .verify("q", "draft".to_string(), &[], None, |_| async { Ok(None) })
            .await
            .unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn test_refinement_failure_is_absorbed() {
        let verifier = IterativeVerifier::new(VerifierConfig {
            convergence_threshold: 2.0,
            min_delta: -1.0,
            max_iterations: 10,
        });
        let outcome = verifier
            .verify("q", "draft".to_string(), &[], None, |_| async {
                Err(Error::TierFailed {
                    tier: crate::models::Tier::Student,
                    cause: "boom".to_string(),
                })
            })
            .await
            .unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.answer, "draft");
    }

    #[tokio::test]
    async fn test_expired_deadline_exhausts_early() {
        let verifier = IterativeVerifier::new(VerifierConfig {
            convergence_threshold: 2.0,
            min_delta: -1.0,
            max_iterations: 10,
        });
        let deadline = Some(Instant::now() - std::time::Duration::from_millis(1));
        let outcome = verifier
            .verify("q", "draft".to_string(), &[], deadline, |_| async {
                Ok(Some("should not run".to_string()))
            })
            .await
            .unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.answer, "draft");
    }

    #[tokio::test]
    async fn test_zero_iterations_is_invalid() {
        let verifier = IterativeVerifier::new(config(0));
        let err = verifier
            .verify("q", "d".to_string(), &[], None, |_| async { Ok(None) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
