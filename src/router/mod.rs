//! Model routing.
//!
//! Chooses the primary and fallback tier for a generation from the
//! difficulty assessment, the per-request tier switches, and the remaining
//! budget. The response cache is consulted before the router is ever asked
//! to generate (a hit short-circuits dispatch entirely); see the pipeline,
//! which wraps [`ModelRouter::generate`] in `ResponseCache::get_or_compute`.

use crate::models::{DifficultyAssessment, Tier};
use crate::tier::{ModelTier, TierRequest, TierResponse};
use crate::{Error, Result};
use std::sync::Arc;

/// The routing decision for one generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingDecision {
    /// Tier to try first.
    pub primary: Tier,
    /// Tier to retry against if the primary fails, when one is enabled.
    pub fallback: Option<Tier>,
    /// Estimated cost in USD of the primary call.
    pub estimated_cost_usd: f64,
    /// Whether the budget forced a downgrade from the preferred tier.
    pub downgraded: bool,
}

/// Per-request tier switches, resolved from `RunConfig` and registration.
#[derive(Debug, Clone, Copy)]
pub struct TierSwitches {
    /// Whether the teacher tier may be called.
    pub teacher: bool,
    /// Whether the student tier may be called.
    pub student: bool,
}

impl TierSwitches {
    /// Whether the given tier is enabled.
    #[must_use]
    pub const fn allows(&self, tier: Tier) -> bool {
        match tier {
            Tier::Teacher => self.teacher,
            Tier::Student => self.student,
        }
    }
}

/// Router over the registered tier endpoints.
pub struct ModelRouter {
    teacher: Option<Arc<dyn ModelTier>>,
    student: Option<Arc<dyn ModelTier>>,
    difficulty_threshold: f64,
}

impl ModelRouter {
    /// Creates a router.
    ///
    /// A tier passed as `None` is treated as disabled for every request.
    #[must_use]
    pub const fn new(
        teacher: Option<Arc<dyn ModelTier>>,
        student: Option<Arc<dyn ModelTier>>,
        difficulty_threshold: f64,
    ) -> Self {
        Self {
            teacher,
            student,
            difficulty_threshold,
        }
    }

    /// The registered endpoint for a tier, if any.
    #[must_use]
    pub fn endpoint(&self, tier: Tier) -> Option<&Arc<dyn ModelTier>> {
        match tier {
            Tier::Teacher => self.teacher.as_ref(),
            Tier::Student => self.student.as_ref(),
        }
    }

    fn enabled(&self, tier: Tier, switches: TierSwitches) -> bool {
        switches.allows(tier) && self.endpoint(tier).is_some()
    }

    fn cost_of(&self, tier: Tier, request: &TierRequest) -> f64 {
        self.endpoint(tier)
            .map_or(f64::INFINITY, |t| t.estimated_cost_usd(request))
    }

    /// Decides the tier order for one generation.
    ///
    /// Policy: above the difficulty threshold the teacher tier is preferred
    /// as primary with the student as fallback; below it the order inverts.
    /// If the preferred primary would exceed `remaining_budget_usd`, the
    /// router downgrades to the cheaper enabled tier instead of aborting.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] when no tier is both enabled and registered.
    /// - [`Error::BudgetExceeded`] if and only if the cheapest enabled
    ///   tier's estimated cost still exceeds the remaining budget.
    pub fn dispatch(
        &self,
        request: &TierRequest,
        assessment: &DifficultyAssessment,
        switches: TierSwitches,
        remaining_budget_usd: f64,
    ) -> Result<RoutingDecision> {
        let preferred = if assessment.difficulty > self.difficulty_threshold {
            Tier::Teacher
        } else {
            Tier::Student
        };

        let mut order: Vec<Tier> = [preferred, preferred.other()]
            .into_iter()
            .filter(|tier| self.enabled(*tier, switches))
            .collect();
        if order.is_empty() {
            return Err(Error::InvalidInput(
                "no model tier is enabled and registered".to_string(),
            ));
        }

        // Budget enforcement: drop tiers the budget cannot cover, cheapest
        // last so a downgrade is attempted before giving up.
        let affordable: Vec<Tier> = order
            .iter()
            .copied()
            .filter(|tier| self.cost_of(*tier, request) <= remaining_budget_usd)
            .collect();

        if affordable.is_empty() {
            let cheapest = order
                .iter()
                .copied()
                .min_by(|a, b| {
                    self.cost_of(*a, request)
                        .partial_cmp(&self.cost_of(*b, request))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(preferred);
            return Err(Error::BudgetExceeded {
                estimated_usd: self.cost_of(cheapest, request),
                ceiling_usd: remaining_budget_usd,
            });
        }
        order.retain(|tier| affordable.contains(tier));

        let primary = order[0];
        let decision = RoutingDecision {
            primary,
            fallback: order.get(1).copied(),
            estimated_cost_usd: self.cost_of(primary, request),
            downgraded: primary != preferred,
        };
        tracing::debug!(
            difficulty = assessment.difficulty,
            primary = %decision.primary,
            fallback = ?decision.fallback,
            downgraded = decision.downgraded,
            "routing decision"
        );
        metrics::counter!(
            "router_dispatch_total",
            "primary" => decision.primary.as_str()
        )
        .increment(1);
        Ok(decision)
    }

    /// Runs one generation under a routing decision: the primary tier first,
    /// then exactly one retry against the fallback tier if the primary
    /// fails.
    ///
    /// Returns the response and the tier that produced it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllTiersFailed`] when the fallback also fails, or
    /// the primary's [`Error::TierFailed`] when no fallback is enabled.
    pub async fn generate(
        &self,
        request: &TierRequest,
        decision: RoutingDecision,
    ) -> Result<(TierResponse, Tier)> {
        let primary = self
            .endpoint(decision.primary)
            .ok_or_else(|| Error::InvalidInput("primary tier not registered".to_string()))?;

        let primary_err = match primary.complete(request).await {
            Ok(response) => return Ok((response, decision.primary)),
            Err(err) => err,
        };

        let Some(fallback_tier) = decision.fallback else {
            return Err(primary_err);
        };
        let fallback = self
            .endpoint(fallback_tier)
            .ok_or_else(|| Error::InvalidInput("fallback tier not registered".to_string()))?;

        tracing::warn!(
            primary = %decision.primary,
            fallback = %fallback_tier,
            error = %primary_err,
            "primary tier failed; retrying against fallback"
        );
        metrics::counter!(
            "router_fallbacks_total",
            "from" => decision.primary.as_str(),
            "to" => fallback_tier.as_str()
        )
        .increment(1);

        match fallback.complete(request).await {
            Ok(response) => Ok((response, fallback_tier)),
            Err(fallback_err) => Err(Error::AllTiersFailed {
                primary: decision.primary,
                primary_cause: primary_err.to_string(),
                fallback: fallback_tier,
                fallback_cause: fallback_err.to_string(),
            }),
        }
    }
}
