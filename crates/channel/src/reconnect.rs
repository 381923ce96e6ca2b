//! Exponential-backoff policy for progress channel reconnection.
//!
//! The delay before retry number `n` (1-based) is `base_delay * 2^(n-1)`.
//! Growth is uncapped unless [`ReconnectConfig::max_delay`] is set, and no
//! jitter is applied.

use std::time::Duration;

/// Tunable parameters for the reconnect strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Consecutive failures tolerated before the channel gives up.
    pub max_attempts: u32,
    /// Optional ceiling on a single delay.
    pub max_delay: Option<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            max_delay: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait before the next retry when `attempts` retries have
    /// already been scheduled since the last successful connect.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let delay = 2u32
            .checked_pow(attempts)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// `true` when another retry may be scheduled.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
