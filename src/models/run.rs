//! Run results and the append-only run metadata record.

use super::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-stage cost and latency, one entry per component invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    /// Stage name (`estimate`, `retrieve`, `expand`, `generate`, ...).
    pub stage: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Model spend attributed to this stage in USD.
    pub cost_usd: f64,
}

/// Append-only observability record, written once per request by the
/// outcome recorder. Also the recalibration input for the difficulty
/// estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// The pipeline run this record belongs to.
    pub run_id: Uuid,
    /// When the run finished.
    pub recorded_at: DateTime<Utc>,
    /// Domain tag of the originating query.
    pub domain: String,
    /// Difficulty estimate the router acted on.
    pub difficulty: f64,
    /// Per-stage cost and latency breakdown.
    pub stages: Vec<StageTiming>,
    /// Number of teacher-tier calls made.
    pub teacher_calls: u32,
    /// Number of student-tier calls made.
    pub student_calls: u32,
    /// Tier that produced the accepted draft, if any model was called.
    pub answered_by: Option<Tier>,
    /// Whether the response was served from cache.
    pub cache_hit: bool,
    /// Whether the verifier converged (false means best-seen was returned).
    pub converged: bool,
    /// Final aggregate quality score in [0, 1].
    pub quality_score: f64,
    /// Total spend in USD.
    pub cost_usd: f64,
    /// End-to-end latency in milliseconds.
    pub duration_ms: u64,
    /// Whether the run was judged successful.
    pub success: bool,
}

impl RunMetadata {
    /// Creates an empty record for a run in `domain`.
    #[must_use]
    pub fn new(run_id: Uuid, domain: impl Into<String>) -> Self {
        Self {
            run_id,
            recorded_at: Utc::now(),
            domain: domain.into(),
            difficulty: 0.0,
            stages: Vec::new(),
            teacher_calls: 0,
            student_calls: 0,
            answered_by: None,
            cache_hit: false,
            converged: false,
            quality_score: 0.0,
            cost_usd: 0.0,
            duration_ms: 0,
            success: false,
        }
    }

    /// Total model calls across both tiers.
    #[must_use]
    pub const fn total_calls(&self) -> u32 {
        self.teacher_calls + self.student_calls
    }
}

/// The caller-facing result of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// The final synthesized answer.
    pub answer: String,
    /// Human-readable trace of pipeline decisions, in order.
    pub reasoning_trace: Vec<String>,
    /// Run metadata (quality, cost, latency, call counts, flags).
    pub metadata: RunMetadata,
}
