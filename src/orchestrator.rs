//! Fans a plate out to every provider and waits for all of them to settle.
//!
//! Each call is bounded by a timeout, guarded by the provider's circuit breaker
//! and retried with exponential backoff on transient failures. One provider's
//! failure never cancels the others; the orchestration fails only when nobody
//! returned a payload.

use failsafe::futures::CircuitBreaker as _;
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::{create_provider_circuit_breaker, ProviderBreaker};
use crate::errors::{LookupError, ProviderError};
use crate::models::{ProviderFetch, ProviderId, ProviderPayload};
use crate::services::{ProviderResult, VehicleDataProvider};

/// Retry policy for transient provider failures (network, rate limit).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(200),
            factor: 2.0,
            max_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn none() -> Self {
        Self::exponential(0)
    }

    /// Delay before retry number `attempt` (0-based): `base * factor^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let scale = self.factor.powi(attempt as i32);
        let seconds = (self.base_delay.as_secs_f64() * scale).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(seconds)
    }
}

/// Settled outcome of one fan-out with at least one success.
#[derive(Debug, Clone)]
pub struct Orchestration {
    pub successes: Vec<ProviderFetch>,
    pub failures: Vec<(ProviderId, ProviderError)>,
}

impl Orchestration {
    pub fn payloads(&self) -> Vec<ProviderPayload> {
        self.successes.iter().map(|s| s.payload.clone()).collect()
    }

    /// Providers that charged for their successful call.
    pub fn billable_providers(&self) -> Vec<ProviderId> {
        self.successes
            .iter()
            .filter(|s| s.billable)
            .map(|s| s.payload.provider)
            .collect()
    }
}

/// Picks the failure a caller can act on: highest specificity, then provider order.
pub fn most_specific(failures: &[(ProviderId, ProviderError)]) -> Option<&ProviderError> {
    failures
        .iter()
        .min_by_key(|(provider, err)| (Reverse(err.specificity()), *provider))
        .map(|(_, err)| err)
}

struct GuardedProvider {
    provider: Arc<dyn VehicleDataProvider>,
    breaker: ProviderBreaker,
}

pub struct ProviderOrchestrator {
    providers: Vec<GuardedProvider>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ProviderOrchestrator {
    pub fn new(
        providers: Vec<Arc<dyn VehicleDataProvider>>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| GuardedProvider {
                provider,
                breaker: create_provider_circuit_breaker(),
            })
            .collect();

        Self {
            providers,
            timeout,
            retry,
        }
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|g| g.provider.id()).collect()
    }

    /// Calls every provider in parallel and returns once all have settled.
    pub async fn fetch_all(
        &self,
        plate: &str,
        mileage: Option<u32>,
    ) -> Result<Orchestration, LookupError> {
        if self.providers.is_empty() {
            return Err(LookupError::Internal("no providers configured".to_string()));
        }

        let handles: Vec<_> = self
            .providers
            .iter()
            .map(|guarded| {
                let id = guarded.provider.id();
                let call = call_with_retry(
                    Arc::clone(&guarded.provider),
                    guarded.breaker.clone(),
                    plate.to_string(),
                    mileage,
                    self.timeout,
                    self.retry,
                );
                (id, tokio::spawn(call))
            })
            .collect();

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for (id, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(ProviderError::Network(format!("{} call aborted: {}", id, e)))
            });
            match outcome {
                Ok(fetch) => successes.push(fetch),
                Err(err) => {
                    tracing::warn!("{}: {} failed: {}", plate, id, err);
                    failures.push((id, err));
                }
            }
        }

        if successes.is_empty() {
            let cause = most_specific(&failures)
                .cloned()
                .unwrap_or_else(|| ProviderError::Network("no provider answered".to_string()));
            tracing::error!("{}: all providers failed, reporting {}", plate, cause);
            return Err(LookupError::AllProvidersFailed { cause, failures });
        }

        tracing::info!(
            "{}: {} of {} providers answered",
            plate,
            successes.len(),
            self.providers.len()
        );
        Ok(Orchestration {
            successes,
            failures,
        })
    }
}

async fn call_with_retry(
    provider: Arc<dyn VehicleDataProvider>,
    breaker: ProviderBreaker,
    plate: String,
    mileage: Option<u32>,
    timeout: Duration,
    retry: RetryPolicy,
) -> ProviderResult {
    let id = provider.id();
    let mut attempt = 0;

    loop {
        let mut timed_out = false;
        let call = async {
            match tokio::time::timeout(timeout, provider.fetch(&plate, mileage)).await {
                Ok(result) => result,
                Err(_) => {
                    timed_out = true;
                    Err(ProviderError::Network(format!(
                        "{} timed out after {}ms",
                        id,
                        timeout.as_millis()
                    )))
                }
            }
        };

        let err = match breaker.call_with(ProviderError::trips_breaker, call).await {
            Ok(fetch) => return Ok(fetch),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("{}: {} circuit open, skipping call", plate, id);
                return Err(ProviderError::Network(format!("{} circuit open", id)));
            }
            Err(failsafe::Error::Inner(err)) => err,
        };

        // A timed-out request may still have been served and billed upstream.
        if timed_out {
            tracing::warn!("{}: {} timed out, not retrying", plate, id);
            return Err(err);
        }
        if !err.is_retryable() || attempt >= retry.max_retries {
            return Err(err);
        }

        let delay = retry.delay(attempt);
        tracing::debug!(
            "{}: {} attempt {} failed ({}), retrying in {}ms",
            plate,
            id,
            attempt + 1,
            err,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
