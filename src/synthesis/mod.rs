//! Answer synthesis.
//!
//! Merges weighted candidate answers (verifier output, raw tier drafts)
//! with the retrieved context into one final answer and an aggregate
//! quality score. A single candidate passes through untouched; conflicting
//! candidates resolve toward the higher weight × confidence product, with
//! the losers surfaced in metadata for debuggability.

use crate::models::RetrievedItem;
use crate::{Error, Result};

/// A candidate answer with its source weighting.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Label of the source ("verifier", "teacher", "student", ...).
    pub source: String,
    /// The candidate answer text.
    pub answer: String,
    /// Confidence the source assigned in [0, 1].
    pub confidence: f64,
    /// Relative weight of the source in [0, 1].
    pub weight: f64,
}

impl Candidate {
    /// Creates a candidate.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        answer: impl Into<String>,
        confidence: f64,
        weight: f64,
    ) -> Self {
        Self {
            source: source.into(),
            answer: answer.into(),
            confidence: confidence.clamp(0.0, 1.0),
            weight: weight.clamp(0.0, 1.0),
        }
    }

    fn rank(&self) -> f64 {
        self.weight * self.confidence
    }
}

/// The synthesized result.
#[derive(Debug, Clone)]
pub struct Synthesis {
    /// The final answer.
    pub answer: String,
    /// Aggregate quality score in [0, 1].
    pub quality_score: f64,
    /// Sources that lost the conflict resolution, with their rank, for
    /// metadata and debugging. Empty for a single candidate.
    pub runners_up: Vec<(String, f64)>,
}

/// Weighted candidate merger.
#[derive(Debug, Clone, Copy, Default)]
pub struct Synthesizer;

impl Synthesizer {
    /// Creates a synthesizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Merges candidates into a final answer with a quality score.
    ///
    /// Quality is the winner's confidence blended with the weighted mean
    /// confidence of all sources and the mean relevance of the retrieved
    /// context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when `candidates` is empty.
    pub fn synthesize(
        &self,
        candidates: &[Candidate],
        context: &[RetrievedItem],
    ) -> Result<Synthesis> {
        let Some(first) = candidates.first() else {
            return Err(Error::InvalidInput(
                "synthesis requires at least one candidate".to_string(),
            ));
        };

        // Identity pass-through: one candidate, no merge artifacts.
        if candidates.len() == 1 {
            return Ok(Synthesis {
                answer: first.answer.clone(),
                quality_score: quality_score(first.confidence, candidates, context),
                runners_up: Vec::new(),
            });
        }

        let winner = candidates
            .iter()
            .max_by(|a, b| {
                a.rank()
                    .partial_cmp(&b.rank())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // Deterministic tie-break: earlier candidate wins.
                    .then(std::cmp::Ordering::Greater)
            })
            .unwrap_or(first);

        let runners_up = candidates
            .iter()
            .filter(|c| !std::ptr::eq(*c, winner))
            .map(|c| (c.source.clone(), c.rank()))
            .collect();

        Ok(Synthesis {
            answer: winner.answer.clone(),
            quality_score: quality_score(winner.confidence, candidates, context),
            runners_up,
        })
    }
}

/// Winner confidence blended with the weighted source mean and the mean
/// context relevance.
fn quality_score(
    winner_confidence: f64,
    candidates: &[Candidate],
    context: &[RetrievedItem],
) -> f64 {
    let weight_sum: f64 = candidates.iter().map(|c| c.weight).sum();
    let weighted_mean = if weight_sum > 0.0 {
        candidates.iter().map(Candidate::rank).sum::<f64>() / weight_sum
    } else {
        winner_confidence
    };

    #[allow(clippy::cast_precision_loss)]
    let context_relevance = if context.is_empty() {
        0.5
    } else {
        context.iter().map(|r| f64::from(r.score)).sum::<f64>() / context.len() as f64
    };

    0.15f64
        .mul_add(
            context_relevance,
            0.6f64.mul_add(winner_confidence, 0.25 * weighted_mean),
        )
        .clamp(0.0, 1.0)
}
