//! # Retry Policy Module
//!
//! Backoff policy for the intake publish loop.
//!
//! Attempts are bounded both by count and by total elapsed time; whichever
//! budget runs out first ends the loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Retry policy configuration
///
/// # Examples
///
/// ```rust
/// use audit_keeper_core::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // Fixed 200ms backoff, at most 10 attempts within 5 seconds
/// let policy = RetryPolicy::fixed(10, Duration::from_millis(200), Duration::from_secs(5));
/// assert_eq!(policy.calculate_delay(3), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of publish attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Total time budget across all attempts
    #[serde(with = "duration_millis")]
    pub fail_timeout: Duration,

    /// Exponential backoff multiplier (1.0 = fixed backoff)
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as a fraction (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            fail_timeout: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Create a fixed-interval policy without jitter
    pub fn fixed(max_attempts: u32, interval: Duration, fail_timeout: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: interval,
            max_delay: interval,
            fail_timeout,
            backoff_multiplier: 1.0,
            use_jitter: false,
            jitter_percent: 0.0,
        }
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Calculate the delay before retry number `retry` (0-based).
    ///
    /// delay = initial * multiplier^retry, capped at `max_delay`, then jittered.
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(retry as i32);

        let capped_delay_secs = base_delay_secs.min(self.max_delay.as_secs_f64());

        let final_delay_secs = if self.use_jitter {
            Self::add_jitter(capped_delay_secs, self.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::from_secs_f64(final_delay_secs)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, attempts_made: u32, elapsed: Duration) -> bool {
        attempts_made < self.max_attempts && elapsed < self.fail_timeout
    }

    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;

        // random::<f64>() is uniform in [0, 1)
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;

        (delay_secs + jitter).max(0.0)
    }
}

/// State tracker for a retry loop
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Attempts made so far
    pub attempts: u32,

    started: Instant,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    /// Start tracking a new retry loop
    pub fn new() -> Self {
        Self {
            attempts: 0,
            started: Instant::now(),
        }
    }

    /// Record that an attempt is being made
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Time since the loop started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Delay before the next attempt
    pub fn get_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.calculate_delay(self.attempts.saturating_sub(1))
    }

    /// Check whether the policy allows another attempt
    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        policy.should_retry(self.attempts, self.elapsed())
    }
}

/// Serde helper storing durations as integer milliseconds
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
