//! OpenAI-compatible chat-completions tier client.
//!
//! Default backing for the teacher tier; also works against any endpoint
//! speaking the same API surface.

use super::{ModelTier, TierHttpConfig, TierRequest, TierResponse, build_http_client,
            classify_reqwest_error, estimate_tokens};
use crate::models::Tier;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible model tier.
pub struct OpenAiTier {
    /// Which capability tier this endpoint serves.
    tier: Tier,
    /// API key.
    api_key: Option<String>,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// Cost per 1k tokens in USD.
    cost_per_1k_tokens_usd: f64,
    /// HTTP client.
    client: reqwest::Client,
}

impl OpenAiTier {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o";

    /// Creates a client for the given tier with env-derived defaults.
    #[must_use]
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            cost_per_1k_tokens_usd: 0.01,
            client: build_http_client(TierHttpConfig::from_env()),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
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
impl ModelTier for OpenAiTier {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn estimated_cost_usd(&self, request: &TierRequest) -> f64 {
        let prompt_tokens = estimate_tokens(&request.prompt, "");
        self.cost_per_1k_tokens_usd * f64::from(prompt_tokens + request.max_tokens) / 1000.0
    }

    async fn complete(&self, request: &TierRequest) -> Result<TierResponse> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| self.tier_error("OPENAI_API_KEY not set".to_string()))?;

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            temperature: 0.7,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let error_kind = classify_reqwest_error(&e);
                tracing::error!(
                    provider = "openai",
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
                provider = "openai",
                tier = %self.tier,
                model = %self.model,
                status = %status,
                body = %body,
                "tier API returned error status"
            );
            let cause = if status.as_u16() == 429 {
                format!("rate limited: {status} - {body}")
            } else {
                format!("API returned status: {status} - {body}")
            };
            return Err(self.tier_error(cause));
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| self.tier_error(format!("undecodable response: {e}")))?;

        let text = response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| self.tier_error("no choices in response".to_string()))?;

        let tokens_used = response
            .usage
            .map_or_else(|| estimate_tokens(&request.prompt, &text), |u| u.total_tokens);

        Ok(TierResponse { text, tokens_used })
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Chat message for the completions API.
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Chat completion request body.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

/// Chat completion response body.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}
