use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker type shared by every provider.
pub type ProviderBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Consecutive tripping failures that open the breaker.
pub const FAILURE_THRESHOLD: u32 = 5;

/// Creates a circuit breaker guarding one vehicle data provider.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive auth, rate-limit or network failures
///   trigger OPEN state. Not-found and invalid-input answers never count.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, calls reach the provider.
/// - **OPEN**: The provider is treated as unavailable and no paid call is made.
/// - **HALF_OPEN**: One trial call decides whether to close again.
pub fn create_provider_circuit_breaker() -> ProviderBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(FAILURE_THRESHOLD, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
