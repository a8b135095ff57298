//! CLI support: tier factories and pipeline assembly.
//!
//! The binary's clap definitions live in `main.rs`; this module builds the
//! runtime pieces from an [`AxonConfig`] so the binary stays thin.

use std::sync::Arc;

use crate::config::{AxonConfig, TierSettings};
use crate::models::Tier;
use crate::pipeline::Pipeline;
use crate::tier::{
    ModelTier, OllamaTier, OpenAiTier, ResilientTier, TierHttpConfig, TierResilienceConfig,
};

/// Builds HTTP configuration from tier settings with environment overrides.
#[must_use]
pub fn build_http_config(settings: &TierSettings) -> TierHttpConfig {
    TierHttpConfig {
        timeout_ms: settings.timeout_ms,
        connect_timeout_ms: TierHttpConfig::default().connect_timeout_ms,
    }
    .with_env_overrides()
}

/// Builds the teacher-tier client from configuration.
///
/// The teacher tier speaks the `OpenAI` chat-completions API.
#[must_use]
pub fn build_teacher_tier(config: &AxonConfig) -> Arc<dyn ModelTier> {
    let settings = config.tier(Tier::Teacher);
    let mut client = OpenAiTier::new(Tier::Teacher)
        .with_model(&settings.model)
        .with_cost_per_1k_tokens(settings.cost_per_1k_tokens_usd);
    if let Some(ref base_url) = settings.base_url {
        client = client.with_endpoint(base_url);
    }
    if let Some(api_key) = settings.resolved_api_key() {
        client = client.with_api_key(api_key);
    }
    let client = client.with_http_config(build_http_config(settings));
    wrap_resilient(Arc::new(client))
}

/// Builds the student-tier client from configuration.
///
/// The student tier targets a local Ollama endpoint.
#[must_use]
pub fn build_student_tier(config: &AxonConfig) -> Arc<dyn ModelTier> {
    let settings = config.tier(Tier::Student);
    let mut client = OllamaTier::new(Tier::Student)
        .with_model(&settings.model)
        .with_cost_per_1k_tokens(settings.cost_per_1k_tokens_usd);
    if let Some(ref base_url) = settings.base_url {
        client = client.with_endpoint(base_url);
    }
    let client = client.with_http_config(build_http_config(settings));
    wrap_resilient(Arc::new(client))
}

fn wrap_resilient(inner: Arc<dyn ModelTier>) -> Arc<dyn ModelTier> {
    Arc::new(ResilientTier::new(
        inner,
        TierResilienceConfig::default().with_env_overrides(),
    ))
}

/// Assembles a pipeline with both tiers registered from configuration.
#[must_use]
pub fn build_pipeline(config: AxonConfig) -> Pipeline {
    let teacher = build_teacher_tier(&config);
    let student = build_student_tier(&config);
    Pipeline::builder()
        .config(config)
        .teacher(teacher)
        .student(student)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_pipeline_registers_both_tiers() {
        let pipeline = build_pipeline(AxonConfig::default());
        // Both tiers registered means a default run config validates and the
        // router has endpoints to dispatch to.
        assert!(crate::config::RunConfig::default().validate().is_ok());
        assert!(pipeline.config().routing.difficulty_threshold > 0.0);
    }

    #[test]
    fn test_http_config_uses_tier_timeout() {
        let settings = TierSettings::defaults_for(Tier::Student);
        let http = build_http_config(&settings);
        assert_eq!(http.timeout_ms, settings.timeout_ms);
    }
}
