//! Ollama (local) tier client.
//!
//! Default backing for the student tier: local, cheap, low-latency.

use super::{ModelTier, TierHttpConfig, TierRequest, TierResponse, build_http_client,
            classify_reqwest_error, estimate_tokens};
use crate::models::Tier;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Ollama local model tier.
pub struct OllamaTier {
    /// Which capability tier this endpoint serves.
    tier: Tier,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// Cost per 1k tokens in USD (near zero for local inference, but kept
    /// non-zero so budget accounting stays meaningful).
    cost_per_1k_tokens_usd: f64,
    /// HTTP client.
    client: reqwest::Client,
}

impl OllamaTier {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "llama3.2";

    /// Creates a client for the given tier with env-derived defaults.
    #[must_use]
    pub fn new(tier: Tier) -> Self {
        let endpoint =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string());
        let model =
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());

        Self {
            tier,
            endpoint,
            model,
            cost_per_1k_tokens_usd: 0.0002,
            client: build_http_client(TierHttpConfig::from_env()),
        }
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the cost per 1k tokens used for budget estimation.
    #[must_use]
    pub const fn with_cost_per_1k_tokens(mut self, usd: f64) -> Self {
        self.cost_per_1k_tokens_usd = usd;
        self
    }

    /// Sets HTTP client timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: TierHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    fn tier_error(&self, cause: String) -> Error {
        Error::TierFailed {
            tier: self.tier,
            cause,
        }
    }
}

#[async_trait]
impl ModelTier for OllamaTier {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn name(&self) -> &'static str {
        "ollama"
    }

    fn estimated_cost_usd(&self, request: &TierRequest) -> f64 {
        let prompt_tokens = estimate_tokens(&request.prompt, "");
        self.cost_per_1k_tokens_usd * f64::from(prompt_tokens + request.max_tokens) / 1000.0
    }

    async fn complete(&self, request: &TierRequest) -> Result<TierResponse> {
        let body = GenerateRequest {
            model: self.model.clone(),
            prompt: request.prompt.clone(),
            stream: false,
            options: GenerateOptions {
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let error_kind = classify_reqwest_error(&e);
                tracing::error!(
                    provider = "ollama",
                    tier = %self.tier,
                    model = %self.model,
                    error = %e,
                    error_kind = error_kind,
                    "tier request failed"
                );
                self.tier_error(format!("{error_kind} error: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                provider = "ollama",
                tier = %self.tier,
                model = %self.model,
                status = %status,
                body = %body,
                "tier API returned error status"
            );
            return Err(self.tier_error(format!("API returned status: {status} - {body}")));
        }

        let response: GenerateResponse = response
            .json()
            .await
            .map_err(|e| self.tier_error(format!("undecodable response: {e}")))?;

        let tokens_used = match (response.prompt_eval_count, response.eval_count) {
            (Some(p), Some(c)) => p + c,
            _ => estimate_tokens(&request.prompt, &response.response),
        };

        Ok(TierResponse {
            text: response.response,
            tokens_used,
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Generate request body.
#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

/// Generate response body.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_deserialization_without_usage() {
        let json = r#"{"response": "4", "done": true}"#;
        let parsed: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.response, "4");
        assert!(parsed.eval_count.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let tier = OllamaTier::new(Tier::Student)
            .with_endpoint("http://box:11434")
            .with_model("qwen2.5");
        assert_eq!(tier.endpoint, "http://box:11434");
        assert_eq!(tier.model, "qwen2.5");
        assert_eq!(tier.tier(), Tier::Student);
    }
}
