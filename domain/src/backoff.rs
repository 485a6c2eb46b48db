//! Bounded exponential backoff shared by polling and retrying.

use std::time::Duration;

/// How long and how often to keep trying something.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Total time budget across all attempts and delays.
    pub timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::api_retry()
    }
}

impl BackoffPolicy {
    /// Retrying a throttled or flaky control-plane call.
    pub fn api_retry() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            timeout: Duration::from_secs(60),
        }
    }

    /// Waiting for a freshly created volume to leave `creating`.
    pub fn volume_available() -> Self {
        Self {
            max_attempts: 60,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            multiplier: 1.5,
            timeout: Duration::from_secs(10 * 60),
        }
    }

    /// Waiting for a rebooted instance to report `running` again.
    pub fn instance_running() -> Self {
        Self {
            max_attempts: 120,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
            timeout: Duration::from_secs(15 * 60),
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}
