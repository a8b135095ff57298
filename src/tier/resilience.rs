//! Tier resilience wrapper with circuit breaking and retry.

use super::{ModelTier, TierRequest, TierResponse};
use crate::models::Tier;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Resilience configuration for tier calls.
#[derive(Debug, Clone)]
pub struct TierResilienceConfig {
    /// Maximum number of retries for retryable (timeout) failures.
    pub max_retries: u32,
    /// Backoff between retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
    /// Maximum trial calls while half-open.
    pub breaker_half_open_max_calls: u32,
}

impl Default for TierResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_backoff_ms: 100,
            breaker_failure_threshold: 3,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_max_calls: 1,
        }
    }
}

impl TierResilienceConfig {
    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("AXON_TIER_MAX_RETRIES") {
            if let Ok(max_retries) = v.parse::<u32>() {
                self.max_retries = max_retries;
            }
        }
        if let Ok(v) = std::env::var("AXON_TIER_RETRY_BACKOFF_MS") {
            if let Ok(retry_backoff_ms) = v.parse::<u64>() {
                self.retry_backoff_ms = retry_backoff_ms;
            }
        }
        if let Ok(v) = std::env::var("AXON_TIER_BREAKER_THRESHOLD") {
            if let Ok(threshold) = v.parse::<u32>() {
                self.breaker_failure_threshold = threshold;
            }
        }
        self
    }
}

/// Circuit breaker state machine.
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32 },
}

#[derive(Debug)]
struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
}

impl CircuitBreaker {
    fn new(config: &TierResilienceConfig) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
            half_open_max_calls: config.breaker_half_open_max_calls.max(1),
        }
    }

    fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    self.state = BreakerState::HalfOpen { attempts: 0 };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { ref mut attempts } => {
                if *attempts >= self.half_open_max_calls {
                    false
                } else {
                    *attempts += 1;
                    true
                }
            },
        }
    }

    const fn on_success(&mut self) {
        self.state = BreakerState::Closed { failures: 0 };
    }

    fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen { .. } => {
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }
}

/// Model-tier wrapper with circuit breaker and bounded retry.
pub struct ResilientTier {
    inner: Arc<dyn ModelTier>,
    config: TierResilienceConfig,
    breaker: Mutex<CircuitBreaker>,
}

impl ResilientTier {
    /// Wraps a tier.
    #[must_use]
    pub fn new(inner: Arc<dyn ModelTier>, config: TierResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(&config);
        Self {
            inner,
            config,
            breaker: Mutex::new(breaker),
        }
    }

    fn lock_breaker(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ModelTier for ResilientTier {
    fn tier(&self) -> Tier {
        self.inner.tier()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn estimated_cost_usd(&self, request: &TierRequest) -> f64 {
        self.inner.estimated_cost_usd(request)
    }

    async fn complete(&self, request: &TierRequest) -> Result<TierResponse> {
        let provider = self.inner.name();
        let tier_label = self.tier().as_str();

        if !self.lock_breaker().allow() {
            metrics::counter!(
                "tier_circuit_breaker_rejections_total",
                "provider" => provider,
                "tier" => tier_label
            )
            .increment(1);
            return Err(Error::TierFailed {
                tier: self.tier(),
                cause: "circuit breaker open".to_string(),
            });
        }

        let max_attempts = self.config.max_retries + 1;
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < max_attempts {
            attempts += 1;
            let attempt_start = Instant::now();
            match self.inner.complete(request).await {
                Ok(response) => {
                    self.lock_breaker().on_success();
                    metrics::counter!(
                        "tier_requests_total",
                        "provider" => provider,
                        "tier" => tier_label,
                        "status" => "success"
                    )
                    .increment(1);
                    metrics::histogram!(
                        "tier_request_duration_ms",
                        "provider" => provider,
                        "tier" => tier_label
                    )
                    .record(attempt_start.elapsed().as_secs_f64() * 1000.0);
                    return Ok(response);
                },
                Err(err) => {
                    let is_timeout = is_timeout_error(&err);
                    let tripped = self.lock_breaker().on_failure();
                    let status = if is_timeout { "timeout" } else { "error" };
                    metrics::counter!(
                        "tier_requests_total",
                        "provider" => provider,
                        "tier" => tier_label,
                        "status" => status
                    )
                    .increment(1);
                    if tripped {
                        metrics::counter!(
                            "tier_circuit_breaker_trips_total",
                            "provider" => provider,
                            "tier" => tier_label
                        )
                        .increment(1);
                        tracing::warn!(
                            "tier circuit breaker opened for provider={provider} tier={tier_label}"
                        );
                    }

                    let retryable = is_timeout && attempts < max_attempts;
                    if retryable {
                        metrics::counter!(
                            "tier_retries_total",
                            "provider" => provider,
                            "tier" => tier_label
                        )
                        .increment(1);
                        tracing::warn!(
                            "retrying tier call provider={provider} tier={tier_label} elapsed_ms={}",
                            attempt_start.elapsed().as_millis()
                        );
                        if self.config.retry_backoff_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms))
                                .await;
                        }
                        last_error = Some(err);
                    } else {
                        return Err(err);
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| Error::TierFailed {
            tier: self.tier(),
            cause: "exhausted retries".to_string(),
        }))
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }
}

fn is_timeout_error(err: &Error) -> bool {
    match err {
        Error::TierFailed { cause, .. } => {
            let lower = cause.to_lowercase();
            lower.contains("timeout")
                || lower.contains("timed out")
                || lower.contains("deadline")
                || lower.contains("elapsed")
        },
        Error::StageTimeout { .. } => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTier {
        calls: AtomicU32,
        fail_first: u32,
        timeout_flavor: bool,
    }

    #[async_trait]
    impl ModelTier for FlakyTier {
        fn tier(&self) -> Tier {
            Tier::Student
        }

        fn name(&self) -> &'static str {
            "flaky"
        }

        fn estimated_cost_usd(&self, _request: &TierRequest) -> f64 {
            0.0001
        }

        async fn complete(&self, _request: &TierRequest) -> Result<TierResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                let cause = if self.timeout_flavor {
                    "request timed out".to_string()
                } else {
                    "500 internal".to_string()
                };
                Err(Error::TierFailed {
                    tier: Tier::Student,
                    cause,
                })
            } else {
                Ok(TierResponse {
                    text: "ok".to_string(),
                    tokens_used: 2,
                })
            }
        }
    }

    #[tokio::test]
    async fn test_retries_timeouts_up_to_limit() {
        let inner = Arc::new(FlakyTier {
            calls: AtomicU32::new(0),
            fail_first: 1,
            timeout_flavor: true,
        });
        let resilient = ResilientTier::new(
            Arc::clone(&inner) as Arc<dyn ModelTier>,
            TierResilienceConfig {
                max_retries: 1,
                retry_backoff_ms: 0,
                ..TierResilienceConfig::default()
            },
        );
        let response = resilient.complete(&TierRequest::new("q", 8)).await.unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_timeout_errors_are_not_retried() {
        let inner = Arc::new(FlakyTier {
            calls: AtomicU32::new(0),
            fail_first: 1,
            timeout_flavor: false,
        });
        let resilient = ResilientTier::new(
            Arc::clone(&inner) as Arc<dyn ModelTier>,
            TierResilienceConfig {
                max_retries: 3,
                retry_backoff_ms: 0,
                ..TierResilienceConfig::default()
            },
        );
        assert!(resilient.complete(&TierRequest::new("q", 8)).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let inner = Arc::new(FlakyTier {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            timeout_flavor: false,
        });
        let resilient = ResilientTier::new(
            Arc::clone(&inner) as Arc<dyn ModelTier>,
            TierResilienceConfig {
                breaker_failure_threshold: 2,
                breaker_reset_timeout_ms: 60_000,
                ..TierResilienceConfig::default()
            },
        );
        let request = TierRequest::new("q", 8);
        assert!(resilient.complete(&request).await.is_err());
        assert!(resilient.complete(&request).await.is_err());
        // Circuit is now open; the inner tier must not be called again.
        assert!(resilient.complete(&request).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
