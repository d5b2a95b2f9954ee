//! Reconnect policy.
//!
//! The session never reconnects by itself; long-running callers such as
//! `doorlink watch` use this policy to pace their own retry loop.

use std::time::Duration;

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive failures.
    pub multiplier: f64,
    /// Attempts before giving up; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self.multiplier = multiplier;
        self
    }

    /// Builder: limit the number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay to wait after `consecutive_failures` failed attempts.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(consecutive_failures - 1).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let max = self.max_delay.as_secs_f64();

        // powi overflows to infinity for large exponents
        if delay.is_finite() {
            Duration::from_secs_f64(delay.min(max))
        } else {
            self.max_delay
        }
    }

    /// Whether another attempt is allowed after `consecutive_failures`.
    pub fn should_retry(&self, consecutive_failures: u32) -> bool {
        self.max_attempts == 0 || consecutive_failures < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ReconnectPolicy::default().with_backoff(
            Duration::from_secs(1),
            Duration::from_secs(30),
            2.0,
        );
        assert_eq!(policy.backoff_delay(0), Duration::ZERO);
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn shrinking_multiplier_is_clamped() {
        let policy = ReconnectPolicy::default().with_backoff(
            Duration::from_millis(500),
            Duration::from_secs(10),
            0.5,
        );
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(500));
    }

    #[test]
    fn attempt_limit() {
        let unlimited = ReconnectPolicy::default();
        assert!(unlimited.should_retry(1_000));

        let limited = ReconnectPolicy::default().with_max_attempts(3);
        assert!(limited.should_retry(2));
        assert!(!limited.should_retry(3));
    }
}
