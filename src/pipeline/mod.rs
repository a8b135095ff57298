//! Pipeline orchestration.
//!
//! Wires the stages end to end for one query: validate, estimate difficulty,
//! expand and retrieve context, then (under the response cache's singleflight
//! guard) dispatch to a model tier, verify iteratively, and synthesize. The
//! outcome recorder runs after the answer is returned and never delays it.
//!
//! Stage contract: estimation and expansion failures degrade (assume-hard,
//! original-only); generation failures abort the run. A cache hit
//! short-circuits everything downstream of retrieval.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheKey, CacheStats, CachedAnswer, ResponseCache};
use crate::config::{AxonConfig, RunConfig};
use crate::embedding::{Embedder, HashEmbedder};
use crate::estimator::{Calibration, DifficultyEstimator};
use crate::models::{
    ContextItem, DifficultyAssessment, QueryRequest, RetrievedItem, RunMetadata, RunResult,
    StageTiming, Tier,
};
use crate::recorder::{OutcomeRecorder, UsageFeedback};
use crate::retrieval::{ContextRetriever, QueryExpander};
use crate::router::{ModelRouter, TierSwitches};
use crate::store::{ContextStore, MemoryStore};
use crate::synthesis::{Candidate, Synthesizer};
use crate::tier::{ModelTier, TierRequest};
use crate::verifier::{IterativeVerifier, VerifierConfig};
use crate::{Error, Result};

/// Side-channel report from the generation closure, since the cache only
/// carries the answer payload.
#[derive(Debug, Clone, Default)]
struct GenerationReport {
    answered_by: Option<Tier>,
    teacher_calls: u32,
    student_calls: u32,
    converged: bool,
    trace: Vec<String>,
}

/// The adaptive routing and synthesis pipeline.
///
/// Cheap to share behind an `Arc`; all components use interior mutability
/// where they mutate at all.
pub struct Pipeline {
    config: AxonConfig,
    estimator: DifficultyEstimator,
    expander: QueryExpander,
    retriever: ContextRetriever,
    cache: ResponseCache,
    router: Arc<ModelRouter>,
    synthesizer: Synthesizer,
    recorder: OutcomeRecorder,
    store: Arc<dyn ContextStore>,
    embedder: Arc<dyn Embedder>,
}

/// Builder for [`Pipeline`].
///
/// Unset components fall back to in-process defaults: a [`MemoryStore`],
/// a [`HashEmbedder`], and no registered tiers (the router then reports
/// every dispatch as invalid until at least one tier is registered).
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<AxonConfig>,
    store: Option<Arc<dyn ContextStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    teacher: Option<Arc<dyn ModelTier>>,
    student: Option<Arc<dyn ModelTier>>,
}

impl PipelineBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: AxonConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the context store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the embedder.
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Registers the teacher-tier endpoint.
    #[must_use]
    pub fn teacher(mut self, tier: Arc<dyn ModelTier>) -> Self {
        self.teacher = Some(tier);
        self
    }

    /// Registers the student-tier endpoint.
    #[must_use]
    pub fn student(mut self, tier: Arc<dyn ModelTier>) -> Self {
        self.student = Some(tier);
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        let config = self.config.unwrap_or_default();
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashEmbedder::new()));

        let retriever = ContextRetriever::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            config.retrieval.min_similarity,
        );
        let router = Arc::new(ModelRouter::new(
            self.teacher,
            self.student,
            config.routing.difficulty_threshold,
        ));
        let cache = ResponseCache::new(&config.cache);
        let recorder = OutcomeRecorder::new(Arc::clone(&store));

        Pipeline {
            estimator: DifficultyEstimator::new(),
            expander: QueryExpander::new(),
            retriever,
            cache,
            router,
            synthesizer: Synthesizer::new(),
            recorder,
            store,
            embedder,
            config,
        }
    }
}

impl Pipeline {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &AxonConfig {
        &self.config
    }

    /// The shared context store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ContextStore> {
        Arc::clone(&self.store)
    }

    /// Runs one query through the full pipeline.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for an empty query or an invalid config
    /// - [`Error::StageTimeout`] when `request_timeout_ms` expires before a
    ///   first draft exists; once a draft exists the deadline instead cuts
    ///   refinement short and the best-seen draft is returned non-converged
    /// - [`Error::BudgetExceeded`] when no enabled tier fits the ceiling
    /// - [`Error::AllTiersFailed`] / [`Error::TierFailed`] when generation
    ///   fails on every permitted tier
    #[instrument(skip(self, query_text, run_config), fields(domain = %domain))]
    pub async fn execute(
        &self,
        query_text: &str,
        domain: &str,
        run_config: RunConfig,
    ) -> Result<RunResult> {
        run_config.validate()?;
        let query = QueryRequest::new(query_text, domain)?;
        self.run(&query, &run_config, Instant::now()).await
    }

    async fn run(
        &self,
        query: &QueryRequest,
        run_config: &RunConfig,
        started: Instant,
    ) -> Result<RunResult> {
        let deadline = started + Duration::from_millis(run_config.request_timeout_ms);
        let mut stages: Vec<StageTiming> = Vec::new();
        let mut trace: Vec<String> = Vec::new();

        // Difficulty estimation. A failed estimate is absorbed: routing
        // proceeds on the conservative assumption that the query is hard.
        let stage_start = Instant::now();
        let assessment = match self.estimator.estimate(&query.text, &query.domain) {
            Ok(assessment) => assessment,
            Err(e) if e.is_absorbable() => {
                warn!(error = %e, "difficulty estimation failed; assuming hard");
                trace.push("estimation failed, assumed hard".to_string());
                DifficultyAssessment::assume_hard()
            }
            Err(e) => return Err(e),
        };
        push_stage(&mut stages, "estimate", stage_start, 0.0);
        trace.push(format!(
            "difficulty {:.2} (calibration v{})",
            assessment.difficulty, assessment.calibration_version
        ));

        // Expansion and fused retrieval. Expansion is heuristic and never
        // fails; retrieval of the original query must succeed.
        let stage_start = Instant::now();
        let expansions = self
            .expander
            .expand(&query.text, run_config.max_query_expansions);
        trace.push(format!("expanded into {} queries", expansions.len()));
        let remaining = deadline.saturating_duration_since(Instant::now());
        let context = tokio::time::timeout(
            remaining,
            self.retriever
                .retrieve_fused(&expansions, &query.domain, run_config.context_top_k),
        )
        .await
        .map_err(|_| {
            metrics::counter!("pipeline_timeouts_total").increment(1);
            Error::StageTimeout {
                stage: "retrieve",
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            }
        })??;
        push_stage(&mut stages, "retrieve", stage_start, 0.0);
        trace.push(format!("retrieved {} context items", context.len()));

        let switches = TierSwitches {
            teacher: run_config.enable_teacher_tier,
            student: run_config.enable_student_tier,
        };

        // Generation, verification, and synthesis run inside the cache's
        // singleflight guard so concurrent identical requests share one
        // computation. The report travels out through a side channel.
        let report_slot: Arc<Mutex<Option<GenerationReport>>> = Arc::new(Mutex::new(None));
        let stage_start = Instant::now();
        let (entry, cache_hit) = if run_config.cache_enabled {
            let key = CacheKey::for_query(
                &query.normalized_text(),
                &query.domain,
                &run_config.cache_key_fields(),
            );
            let tags = vec![query.domain.clone()];
            self.cache
                .get_or_compute(&key, &tags, || {
                    self.generate_and_verify(
                        query,
                        &assessment,
                        &context,
                        switches,
                        run_config,
                        deadline,
                        Arc::clone(&report_slot),
                    )
                })
                .await?
        } else {
            let value = self
                .generate_and_verify(
                    query,
                    &assessment,
                    &context,
                    switches,
                    run_config,
                    deadline,
                    Arc::clone(&report_slot),
                )
                .await?;
            (
                crate::cache::CacheEntry {
                    value,
                    created_at: crate::current_timestamp(),
                    hit_count: 0,
                },
                false,
            )
        };
        push_stage(
            &mut stages,
            "generate",
            stage_start,
            if cache_hit { 0.0 } else { entry.value.cost_usd },
        );

        let report = report_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        if cache_hit {
            trace.push("served from cache".to_string());
            metrics::counter!("pipeline_cache_hits_total").increment(1);
        } else {
            trace.extend(report.trace.iter().cloned());
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let success = cache_hit || report.converged || entry.value.quality_score >= 0.6;
        let metadata = RunMetadata {
            run_id: query.run_id,
            recorded_at: chrono::Utc::now(),
            domain: query.domain.clone(),
            difficulty: assessment.difficulty,
            stages,
            teacher_calls: report.teacher_calls,
            student_calls: report.student_calls,
            answered_by: report.answered_by,
            cache_hit,
            converged: if cache_hit {
                entry.value.converged
            } else {
                report.converged
            },
            quality_score: entry.value.quality_score,
            cost_usd: if cache_hit { 0.0 } else { entry.value.cost_usd },
            duration_ms,
            success,
        };

        // Usage feedback goes to every item that was in the prompt; the
        // recorder runs detached so a slow store never delays the answer.
        let feedback: Vec<UsageFeedback> = context
            .iter()
            .map(|r| UsageFeedback {
                item_id: r.item.id.clone(),
                helpful: success,
            })
            .collect();
        self.recorder.record(metadata.clone(), feedback);

        info!(
            run_id = %metadata.run_id,
            difficulty = metadata.difficulty,
            cache_hit,
            answered_by = ?metadata.answered_by,
            cost_usd = metadata.cost_usd,
            duration_ms,
            "pipeline run complete"
        );
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("pipeline_duration_ms").record(metadata.duration_ms as f64);
        metrics::histogram!("pipeline_cost_usd").record(metadata.cost_usd);

        Ok(RunResult {
            answer: entry.value.answer,
            reasoning_trace: trace,
            metadata,
        })
    }

    /// The cached computation: dispatch, generate with fallback, verify
    /// iteratively, synthesize.
    #[allow(clippy::too_many_arguments)]
    async fn generate_and_verify(
        &self,
        query: &QueryRequest,
        assessment: &DifficultyAssessment,
        context: &[RetrievedItem],
        switches: TierSwitches,
        run_config: &RunConfig,
        deadline: Instant,
        report_slot: Arc<Mutex<Option<GenerationReport>>>,
    ) -> Result<CachedAnswer> {
        let mut report = GenerationReport::default();

        let prompt = build_prompt(&query.text, context);
        let max_tokens = self
            .config
            .tier(if assessment.difficulty > self.config.routing.difficulty_threshold {
                Tier::Teacher
            } else {
                Tier::Student
            })
            .max_tokens;
        let request = TierRequest::new(prompt, max_tokens);

        let decision = self.router.dispatch(
            &request,
            assessment,
            switches,
            run_config.cost_ceiling_usd,
        )?;
        if decision.downgraded {
            report
                .trace
                .push(format!("budget downgrade to {}", decision.primary));
        }
        report.trace.push(format!(
            "dispatched to {} (fallback {:?})",
            decision.primary, decision.fallback
        ));

        // No draft exists yet, so deadline expiry here is a terminal timeout
        // rather than a best-seen return.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (response, answered_by) =
            tokio::time::timeout(remaining, self.router.generate(&request, decision))
                .await
                .map_err(|_| {
                    metrics::counter!("pipeline_timeouts_total").increment(1);
                    Error::StageTimeout {
                        stage: "generate",
                        elapsed_ms: run_config.request_timeout_ms,
                    }
                })??;
        report.count_call(answered_by);
        let mut spent = self.call_cost(answered_by, response.tokens_used);
        report
            .trace
            .push(format!("{answered_by} answered ({} tokens)", response.tokens_used));

        // Iterative verification. Refinement goes back to the tier that
        // answered; the budget closure stops the loop once another call no
        // longer fits under the ceiling.
        let verifier = IterativeVerifier::new(VerifierConfig {
            convergence_threshold: self.config.verifier.convergence_threshold,
            min_delta: self.config.verifier.min_delta,
            max_iterations: run_config.max_verification_iterations,
        });
        let endpoint = self
            .router
            .endpoint(answered_by)
            .map(Arc::clone)
            .ok_or_else(|| Error::InvalidInput("answering tier not registered".to_string()))?;
        let spent_cell = Arc::new(Mutex::new(spent));
        let refine_calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let ceiling = run_config.cost_ceiling_usd;
        let query_text = query.text.clone();
        let context_block = context_block(context);

        let refine = {
            let endpoint = Arc::clone(&endpoint);
            let spent_cell = Arc::clone(&spent_cell);
            let refine_calls = Arc::clone(&refine_calls);
            move |draft: String| {
                let endpoint = Arc::clone(&endpoint);
                let spent_cell = Arc::clone(&spent_cell);
                let refine_calls = Arc::clone(&refine_calls);
                let prompt = format!(
                    "Question: {query_text}\n{context_block}\n\
                     Previous answer:\n{draft}\n\n\
                     Revise the answer to be more accurate and complete. \
                     Return only the improved answer."
                );
                async move {
                    let request = TierRequest::new(prompt, max_tokens);
                    let next_cost = endpoint.estimated_cost_usd(&request);
                    {
                        let spent = spent_cell.lock().unwrap_or_else(PoisonError::into_inner);
                        if *spent + next_cost > ceiling {
                            debug!(spent = *spent, next_cost, ceiling, "refinement stopped by budget");
                            return Ok(None);
                        }
                    }
                    // The deadline cuts a slow refinement call off mid-flight;
                    // the loop then ends with the best-seen draft.
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    let Ok(response) =
                        tokio::time::timeout(remaining, endpoint.complete(&request)).await
                    else {
                        debug!("refinement call cut off by request deadline");
                        return Ok(None);
                    };
                    let response = response?;
                    refine_calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let mut spent = spent_cell.lock().unwrap_or_else(PoisonError::into_inner);
                    *spent += next_cost;
                    Ok(Some(response.text))
                }
            }
        };

        let initial_draft = response.text;
        let outcome = verifier
            .verify(
                &query.text,
                initial_draft.clone(),
                context,
                Some(deadline),
                refine,
            )
            .await?;
        spent = *spent_cell.lock().unwrap_or_else(PoisonError::into_inner);
        let extra_calls = refine_calls.load(std::sync::atomic::Ordering::Relaxed);
        for _ in 0..extra_calls {
            report.count_call(answered_by);
        }
        report.converged = outcome.converged;
        report.trace.push(format!(
            "verifier: {} passes, confidence {:.2}, {}",
            outcome.iterations,
            outcome.confidence,
            if outcome.converged { "converged" } else { "exhausted" }
        ));

        // Synthesis. With refinement in play the initial draft survives as a
        // low-weight candidate so a regressed refinement cannot win outright.
        let mut candidates = vec![Candidate::new(
            "verifier",
            outcome.answer.clone(),
            outcome.confidence,
            1.0,
        )];
        if outcome.iterations > 1 && outcome.answer != initial_draft {
            let first_confidence = outcome.confidence_history.first().copied().unwrap_or(0.0);
            candidates.push(Candidate::new(
                answered_by.as_str(),
                initial_draft,
                first_confidence,
                0.3,
            ));
        }
        let synthesis = self.synthesizer.synthesize(&candidates, context)?;
        for (source, rank) in &synthesis.runners_up {
            report
                .trace
                .push(format!("synthesis: kept over {source} (rank {rank:.2})"));
        }

        report.answered_by = Some(answered_by);
        let mut slot = report_slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(report);
        drop(slot);

        Ok(CachedAnswer {
            answer: synthesis.answer,
            quality_score: synthesis.quality_score,
            converged: outcome.converged,
            cost_usd: spent,
        })
    }

    fn call_cost(&self, tier: Tier, tokens_used: u32) -> f64 {
        self.config.tier(tier).cost_per_1k_tokens_usd * f64::from(tokens_used) / 1000.0
    }

    /// Adds a context item to the store, embedding its content.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the store write fails.
    pub async fn add_context(
        &self,
        id: impl Into<String> + Send,
        content: impl Into<String> + Send,
        domain: impl Into<String> + Send,
    ) -> Result<()> {
        let content = content.into();
        let embedding = self.embedder.embed(&content)?;
        let item = ContextItem::new(id.into(), content, domain.into()).with_embedding(embedding);
        self.store.upsert(item).await
    }

    /// Recalibrates the difficulty estimator from recent run outcomes.
    ///
    /// Returns the new calibration version.
    ///
    /// # Errors
    ///
    /// Returns an error if the run history cannot be read.
    pub async fn recalibrate(&self, sample_limit: usize) -> Result<u32> {
        let runs = self.store.recent_runs(sample_limit).await?;
        let previous = self.estimator.snapshot();
        let next = Calibration::recalibrate(&previous, &runs);
        let version = next.version;
        info!(
            runs = runs.len(),
            from_version = previous.version,
            to_version = version,
            "estimator recalibrated"
        );
        self.estimator.swap_snapshot(next);
        Ok(version)
    }

    /// Prunes context items whose harmful count dominates.
    ///
    /// # Errors
    ///
    /// Returns an error if the store prune fails.
    pub async fn prune_context(&self) -> Result<usize> {
        let removed = self
            .store
            .prune(self.config.retrieval.prune_min_uses)
            .await?;
        if !removed.is_empty() {
            info!(count = removed.len(), "pruned harmful context items");
        }
        Ok(removed.len())
    }

    /// Drops the cached answer for one specific query, if present. The run
    /// config must match the one the answer was computed under, since its
    /// routing-relevant fields are part of the cache key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty query.
    pub fn invalidate_query(
        &self,
        query_text: &str,
        domain: &str,
        run_config: &RunConfig,
    ) -> Result<()> {
        let query = QueryRequest::new(query_text, domain)?;
        let key = CacheKey::for_query(
            &query.normalized_text(),
            &query.domain,
            &run_config.cache_key_fields(),
        );
        self.cache.invalidate(&key);
        Ok(())
    }

    /// Drops cached answers whose tags include `domain`. Called when the
    /// domain's context changes enough that cached answers may be stale.
    pub fn invalidate_domain(&self, domain: &str) -> usize {
        self.cache.invalidate_by_tag(domain)
    }

    /// Drops expired cache entries eagerly.
    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep_expired()
    }

    /// Current cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl GenerationReport {
    fn count_call(&mut self, tier: Tier) {
        match tier {
            Tier::Teacher => self.teacher_calls += 1,
            Tier::Student => self.student_calls += 1,
        }
    }
}

fn push_stage(stages: &mut Vec<StageTiming>, stage: &str, started: Instant, cost_usd: f64) {
    stages.push(StageTiming {
        stage: stage.to_string(),
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        cost_usd,
    });
}

fn context_block(context: &[RetrievedItem]) -> String {
    if context.is_empty() {
        return String::new();
    }
    let mut block = String::from("Relevant notes:\n");
    for retrieved in context {
        block.push_str("- ");
        block.push_str(&retrieved.item.content);
        block.push('\n');
    }
    block
}

fn build_prompt(query_text: &str, context: &[RetrievedItem]) -> String {
    let block = context_block(context);
    if block.is_empty() {
        format!("Question: {query_text}\n\nAnswer concisely and accurately.")
    } else {
        format!("Question: {query_text}\n\n{block}\nAnswer concisely and accurately.")
    }
}
