//! Difficulty assessment types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Model capability tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Higher-capability, higher-cost model path.
    Teacher,
    /// Lower-cost, lower-latency model path; the default fallback.
    Student,
}

impl Tier {
    /// Returns the other tier.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Teacher => Self::Student,
            Self::Student => Self::Teacher,
        }
    }

    /// Returns the tier name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A symmetric confidence interval around the difficulty point estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Lower bound, clamped to [0, 1].
    pub low: f64,
    /// Upper bound, clamped to [0, 1].
    pub high: f64,
}

impl ConfidenceInterval {
    /// Builds an interval of `±half_width` around `center`, clamped to [0, 1].
    #[must_use]
    pub fn around(center: f64, half_width: f64) -> Self {
        Self {
            low: (center - half_width).clamp(0.0, 1.0),
            high: (center + half_width).clamp(0.0, 1.0),
        }
    }

    /// Interval width.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

/// Output of the difficulty estimator, consumed only by the model router.
///
/// Computed once per request and discarded afterward unless the run's outcome
/// contributes to recalibration data.
#[derive(Debug, Clone, PartialEq)]
pub struct DifficultyAssessment {
    /// Estimated difficulty in [0, 1]; higher means harder.
    pub difficulty: f64,
    /// Expected answer accuracy if the teacher tier handles the query.
    pub expected_accuracy_teacher: f64,
    /// Expected answer accuracy if the student tier handles the query.
    pub expected_accuracy_student: f64,
    /// Uncertainty band around the difficulty point estimate.
    pub interval: ConfidenceInterval,
    /// Version of the calibration snapshot that produced this assessment.
    pub calibration_version: u32,
}

impl DifficultyAssessment {
    /// The conservative assessment used when estimation fails: assume the
    /// query is hard so routing biases toward the teacher tier.
    #[must_use]
    pub const fn assume_hard() -> Self {
        Self {
            difficulty: 0.9,
            expected_accuracy_teacher: 0.7,
            expected_accuracy_student: 0.3,
            interval: ConfidenceInterval {
                low: 0.5,
                high: 1.0,
            },
            calibration_version: 0,
        }
    }

    /// Expected accuracy for the given tier.
    #[must_use]
    pub const fn expected_accuracy(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Teacher => self.expected_accuracy_teacher,
            Tier::Student => self.expected_accuracy_student,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_other_roundtrips() {
        assert_eq!(Tier::Teacher.other(), Tier::Student);
        assert_eq!(Tier::Student.other().other(), Tier::Student);
    }

    #[test]
    fn test_interval_clamps() {
        let iv = ConfidenceInterval::around(0.95, 0.2);
        assert!((iv.high - 1.0).abs() < f64::EPSILON);
        assert!(iv.low > 0.7);
    }

    #[test]
    fn test_assume_hard_is_biased_toward_teacher() {
        let a = DifficultyAssessment::assume_hard();
        assert!(a.difficulty > 0.5);
        assert!(a.expected_accuracy(Tier::Teacher) > a.expected_accuracy(Tier::Student));
    }
}
