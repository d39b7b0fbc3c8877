//! Resilience utilities: retry backoff and idle-wait pacing.
//!
//! This module provides the two delay policies the applier needs:
//!
//! - [`RetryConfig`]: Exponential backoff for transient leader failures
//! - [`IdleBackoff`]: Adaptive wait when the leader has no new data
//!
//! # Example
//!
//! ```rust
//! use replication_applier::resilience::{RetryConfig, IdleBackoff};
//! use std::time::Duration;
//!
//! let retry = RetryConfig::default();
//! assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(400));
//!
//! let mut idle = IdleBackoff::new(Duration::from_millis(500), Duration::from_secs(5));
//! assert_eq!(idle.next_wait(), Duration::from_millis(500));
//! assert_eq!(idle.next_wait(), Duration::from_secs(1));
//! idle.reset(); // new data arrived
//! assert_eq!(idle.next_wait(), Duration::from_millis(500));
//! ```

use std::time::Duration;

/// Configuration for leader-request retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts before the error is surfaced.
    pub max_attempts: usize,

    /// Initial delay before first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Bounded retry for the initial leader handshake.
    ///
    /// Fails after a handful of attempts so configuration errors surface
    /// quickly instead of hanging a fresh follower forever.
    pub fn connect(max_attempts: usize, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let delay = Duration::from_secs_f64(delay_secs);

        std::cmp::min(delay, self.max_delay)
    }
}

/// Adaptive wait for idle tailing rounds.
///
/// Starts at the minimum wait and doubles per consecutive idle round up to
/// the maximum. Any round that yields entries resets the wait back to the
/// minimum, so the applier stays responsive under load without hammering an
/// idle leader.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    min_wait: Duration,
    max_wait: Duration,
    current: Duration,
}

impl IdleBackoff {
    pub fn new(min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            min_wait,
            max_wait,
            current: min_wait,
        }
    }

    /// Wait to use for this idle round; doubles the next one.
    pub fn next_wait(&mut self) -> Duration {
        let wait = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max_wait);
        wait
    }

    /// Reset after a round that made progress.
    pub fn reset(&mut self) {
        self.current = self.min_wait;
    }

    /// Wait the next round would use, without advancing.
    pub fn current(&self) -> Duration {
        self.current
    }
}
