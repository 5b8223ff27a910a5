//! Reconnection backoff policies.
//!
//! The engine calls [`ReconnectionPolicy::next`] once per failed or closed
//! connection and [`ReconnectionPolicy::reset`] once per successful open. It
//! makes no other assumption about the growth curve.

use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Pluggable strategy deciding how long to wait before reconnecting.
pub trait ReconnectionPolicy: Send + std::fmt::Debug {
    /// Delay before the next attempt. Advances the policy's attempt counter.
    fn next(&mut self) -> Duration;

    /// Forget previous failures.
    fn reset(&mut self);
}

/// Exponential backoff: `min(max_delay, 2^attempt * base_delay)`.
///
/// `attempt` counts calls to `next()` since the last `reset()`, read before it
/// is incremented, so the first delay is `base_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialReconnectionPolicy {
    /// Delay returned for the first attempt.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Whether to spread delays by a random factor in `0.5..1.5`.
    pub jitter: bool,
    retries: u32,
}

impl Default for ExponentialReconnectionPolicy {
    fn default() -> Self {
        Self {
            base_delay: ReconnectConfig::BASE_DELAY,
            max_delay: ReconnectConfig::MAX_DELAY,
            jitter: false,
            retries: 0,
        }
    }
}

impl ExponentialReconnectionPolicy {
    /// Create a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Number of `next()` calls since the last reset.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let capped = self.base_delay.saturating_mul(multiplier).min(self.max_delay);

        if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            capped.mul_f64(factor).min(self.max_delay)
        } else {
            capped
        }
    }
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn next(&mut self) -> Duration {
        let delay = self.calculate_delay(self.retries);
        self.retries = self.retries.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.retries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(policy: &mut impl ReconnectionPolicy, n: usize) -> Vec<u128> {
        (0..n).map(|_| policy.next().as_millis()).collect()
    }

    #[test]
    fn test_default_sequence() {
        let mut policy = ExponentialReconnectionPolicy::new();
        assert_eq!(
            millis(&mut policy, 9),
            vec![500, 1000, 2000, 4000, 8000, 16000, 20000, 20000, 20000]
        );
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut policy = ExponentialReconnectionPolicy::new();
        millis(&mut policy, 4);
        assert_eq!(policy.retries(), 4);

        policy.reset();
        assert_eq!(policy.retries(), 0);
        assert_eq!(millis(&mut policy, 2), vec![500, 1000]);
    }

    #[test]
    fn test_delay_capped_for_huge_attempts() {
        let policy = ExponentialReconnectionPolicy::new()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(30));

        assert_eq!(policy.calculate_delay(3), Duration::from_secs(30));
        assert_eq!(policy.calculate_delay(200), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_with_jitter() {
        let policy = ExponentialReconnectionPolicy::new()
            .with_base_delay(Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(true);

        for _ in 0..20 {
            let delay = policy.calculate_delay(1);
            assert!(
                delay >= Duration::from_secs(2) && delay <= Duration::from_secs(6),
                "Delay {:?} should be between 2s and 6s",
                delay
            );
        }
    }
}
