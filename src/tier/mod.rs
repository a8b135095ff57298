//! Model-tier abstraction.
//!
//! Provides a unified async interface over the teacher (high-capability) and
//! student (low-cost) model endpoints. Tier calls are the pipeline's main
//! suspension points; nothing here blocks a worker thread.

mod ollama;
mod openai;
mod resilience;

pub use ollama::OllamaTier;
pub use openai::OpenAiTier;
pub use resilience::{ResilientTier, TierResilienceConfig};

use crate::Result;
use crate::models::Tier;
use async_trait::async_trait;
use std::time::Duration;

/// A completion request sent to a model tier.
#[derive(Debug, Clone)]
pub struct TierRequest {
    /// The full prompt, context included.
    pub prompt: String,
    /// Maximum completion tokens.
    pub max_tokens: u32,
}

impl TierRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
        }
    }
}

/// A completion returned by a model tier.
#[derive(Debug, Clone)]
pub struct TierResponse {
    /// The generated text.
    pub text: String,
    /// Tokens consumed (prompt + completion) as reported by the provider,
    /// or an estimate when the provider does not report usage.
    pub tokens_used: u32,
}

/// Trait for model tiers.
#[async_trait]
pub trait ModelTier: Send + Sync {
    /// Which capability tier this endpoint serves.
    fn tier(&self) -> Tier;

    /// The provider name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Estimated cost in USD for one call at the request's `max_tokens`.
    fn estimated_cost_usd(&self, request: &TierRequest) -> f64;

    /// Generates a completion.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TierFailed`] on timeout, transport failure,
    /// rate limiting, or an undecodable response.
    async fn complete(&self, request: &TierRequest) -> Result<TierResponse>;

    /// Probes whether the endpoint is reachable. Default: assume available.
    async fn is_available(&self) -> bool {
        true
    }
}

/// HTTP client configuration for tier endpoints.
#[derive(Debug, Clone, Copy)]
pub struct TierHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for TierHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl TierHttpConfig {
    /// Loads HTTP configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("AXON_TIER_TIMEOUT_MS") {
            if let Ok(timeout_ms) = v.parse::<u64>() {
                self.timeout_ms = timeout_ms;
            }
        }
        if let Ok(v) = std::env::var("AXON_TIER_CONNECT_TIMEOUT_MS") {
            if let Ok(connect_timeout_ms) = v.parse::<u64>() {
                self.connect_timeout_ms = connect_timeout_ms;
            }
        }
        self
    }
}

/// Builds an async HTTP client for tier requests with configured timeouts.
#[must_use]
pub fn build_http_client(config: TierHttpConfig) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build tier HTTP client: {err}");
        reqwest::Client::new()
    })
}

/// Classifies a reqwest error for logs and retry decisions.
pub(crate) fn classify_reqwest_error(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_request() {
        "request"
    } else {
        "unknown"
    }
}

/// Rough token estimate when the provider reports no usage: ~4 chars/token.
#[must_use]
pub(crate) fn estimate_tokens(prompt: &str, completion: &str) -> u32 {
    let chars = prompt.len() + completion.len();
    u32::try_from(chars / 4).unwrap_or(u32::MAX).max(1)
}
