//! Versioned calibration snapshots and outcome-based recalibration.

use super::QueryFeatures;
use crate::models::{RunMetadata, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Logistic response curve for one tier, mapping difficulty to expected
/// accuracy. `accuracy = sigmoid(bias - slope * difficulty)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierCurve {
    /// Intercept; higher means better accuracy at zero difficulty.
    pub bias: f64,
    /// How fast accuracy decays with difficulty. Must be non-negative.
    pub slope: f64,
}

/// A versioned, immutable set of calibration parameters.
///
/// Parameters are periodically recalibrated from recorded run outcomes via
/// [`Calibration::recalibrate`]; each recalibration bumps `version` so
/// assessments can be traced back to the snapshot that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSnapshot {
    /// Snapshot version, bumped on every recalibration.
    pub version: u32,
    /// Weight of the query-length feature.
    pub weight_length: f64,
    /// Weight of the rare-token-ratio feature.
    pub weight_rare_tokens: f64,
    /// Weight of the reasoning-marker feature.
    pub weight_reasoning: f64,
    /// Weight of (1 - domain familiarity).
    pub weight_unfamiliarity: f64,
    /// Difficulty offset applied before the logistic squash.
    pub difficulty_bias: f64,
    /// Teacher-tier accuracy curve.
    pub teacher_curve: TierCurve,
    /// Student-tier accuracy curve.
    pub student_curve: TierCurve,
    /// Relative familiarity per domain in [0, 1].
    pub domain_familiarity: HashMap<String, f64>,
    /// Familiarity assumed for domains absent from the table.
    pub default_familiarity: f64,
    /// Number of outcome records folded into this snapshot.
    pub samples: u64,
}

impl Default for CalibrationSnapshot {
    fn default() -> Self {
        Self {
            version: 1,
            weight_length: 1.6,
            weight_rare_tokens: 1.2,
            weight_reasoning: 1.8,
            weight_unfamiliarity: 0.8,
            difficulty_bias: -1.6,
            teacher_curve: TierCurve {
                bias: 2.4,
                slope: 2.2,
            },
            student_curve: TierCurve {
                bias: 1.6,
                slope: 3.4,
            },
            domain_familiarity: HashMap::new(),
            default_familiarity: 0.3,
            samples: 0,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl CalibrationSnapshot {
    /// Familiarity for a domain, falling back to the domain-agnostic default.
    #[must_use]
    pub fn domain_familiarity(&self, domain: &str) -> f64 {
        self.domain_familiarity
            .get(domain)
            .copied()
            .unwrap_or(self.default_familiarity)
            .clamp(0.0, 1.0)
    }

    /// Difficulty in [0, 1] for the given features.
    #[must_use]
    pub fn difficulty(&self, features: &QueryFeatures) -> f64 {
        let raw = self.difficulty_bias
            + self.weight_length * features.length
            + self.weight_rare_tokens * features.rare_token_ratio
            + self.weight_reasoning * features.reasoning_markers
            + self.weight_unfamiliarity * (1.0 - features.domain_familiarity);
        sigmoid(raw)
    }

    /// Expected accuracy for a tier at a given difficulty. Monotonically
    /// non-increasing in difficulty.
    #[must_use]
    pub fn expected_accuracy(&self, tier: Tier, difficulty: f64) -> f64 {
        let curve = match tier {
            Tier::Teacher => self.teacher_curve,
            Tier::Student => self.student_curve,
        };
        sigmoid(curve.slope.max(0.0).mul_add(-difficulty, curve.bias))
    }

    /// Half-width of the difficulty confidence interval; shrinks as more
    /// outcome samples are folded in.
    #[must_use]
    pub fn uncertainty_half_width(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let n = self.samples as f64;
        0.25 / (1.0 + n / 50.0).sqrt()
    }
}

/// Recalibration of snapshots from recorded outcomes.
pub struct Calibration;

/// Learning-rate bound for per-recalibration bias shifts.
const MAX_BIAS_SHIFT: f64 = 0.25;

impl Calibration {
    /// Produces a new snapshot from `previous` and a batch of recorded runs.
    ///
    /// Per tier, compares observed success rate against the accuracy the
    /// snapshot predicted for the runs it answered and shifts that tier's
    /// bias by a bounded step. Domain familiarity grows with observed
    /// traffic. The returned snapshot has `version = previous.version + 1`;
    /// an empty batch still bumps the version to keep the audit trail
    /// append-only.
    #[must_use]
    pub fn recalibrate(previous: &CalibrationSnapshot, runs: &[RunMetadata]) -> CalibrationSnapshot {
        let mut next = previous.clone();
        next.version = previous.version.saturating_add(1);
        next.samples = previous.samples.saturating_add(runs.len() as u64);

        for tier in [Tier::Teacher, Tier::Student] {
            let answered: Vec<&RunMetadata> = runs
                .iter()
                .filter(|run| run.answered_by == Some(tier) && !run.cache_hit)
                .collect();
            if answered.is_empty() {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let observed = answered.iter().filter(|run| run.success).count() as f64
                / answered.len() as f64;
            #[allow(clippy::cast_precision_loss)]
            let predicted = answered
                .iter()
                .map(|run| previous.expected_accuracy(tier, run.difficulty))
                .sum::<f64>()
                / answered.len() as f64;
            let shift = (observed - predicted).clamp(-MAX_BIAS_SHIFT, MAX_BIAS_SHIFT);
            let curve = match tier {
                Tier::Teacher => &mut next.teacher_curve,
                Tier::Student => &mut next.student_curve,
            };
            curve.bias += shift;
        }

        for run in runs {
            let familiarity = next
                .domain_familiarity
                .entry(run.domain.clone())
                .or_insert(previous.default_familiarity);
            // Asymptotic approach toward full familiarity with traffic.
            *familiarity += (1.0 - *familiarity) * 0.05;
        }

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn run(tier: Tier, difficulty: f64, success: bool, domain: &str) -> RunMetadata {
        let mut metadata = RunMetadata::new(Uuid::now_v7(), domain);
        metadata.difficulty = difficulty;
        metadata.teacher_calls = u32::from(tier == Tier::Teacher);
        metadata.student_calls = u32::from(tier == Tier::Student);
        metadata.answered_by = Some(tier);
        metadata.converged = true;
        metadata.quality_score = 0.7;
        metadata.cost_usd = 0.001;
        metadata.duration_ms = 10;
        metadata.success = success;
        metadata
    }

    #[test]
    fn test_accuracy_monotone_in_difficulty() {
        let snapshot = CalibrationSnapshot::default();
        let mut previous = 1.0;
        for step in 0..=10 {
            let difficulty = f64::from(step) / 10.0;
            let accuracy = snapshot.expected_accuracy(Tier::Student, difficulty);
            assert!(accuracy <= previous + 1e-12);
            previous = accuracy;
        }
    }

    #[test]
    fn test_recalibrate_bumps_version_even_when_empty() {
        let previous = CalibrationSnapshot::default();
        let next = Calibration::recalibrate(&previous, &[]);
        assert_eq!(next.version, previous.version + 1);
        assert_eq!(next.teacher_curve, previous.teacher_curve);
    }

    #[test]
    fn test_recalibrate_shifts_toward_observed_failures() {
        let previous = CalibrationSnapshot::default();
        let runs: Vec<RunMetadata> = (0..20)
            .map(|_| run(Tier::Student, 0.2, false, "math"))
            .collect();
        let next = Calibration::recalibrate(&previous, &runs);
        // Every easy run failed on the student tier, so its bias must drop.
        assert!(next.student_curve.bias < previous.student_curve.bias);
        // Shift is bounded by the learning rate.
        assert!(previous.student_curve.bias - next.student_curve.bias <= MAX_BIAS_SHIFT + 1e-12);
    }

    #[test]
    fn test_recalibrate_grows_domain_familiarity() {
        let previous = CalibrationSnapshot::default();
        let runs = vec![run(Tier::Student, 0.5, true, "astronomy")];
        let next = Calibration::recalibrate(&previous, &runs);
        assert!(next.domain_familiarity("astronomy") > previous.domain_familiarity("astronomy"));
    }

    #[test]
    fn test_uncertainty_shrinks_with_samples() {
        let fresh = CalibrationSnapshot::default();
        let seasoned = CalibrationSnapshot {
            samples: 500,
            ..CalibrationSnapshot::default()
        };
        assert!(seasoned.uncertainty_half_width() < fresh.uncertainty_half_width());
    }
}
