//! Exponential backoff for RPC calls.

use std::time::Duration;

use pnsindex_core::config::IndexerConfig;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per call, the first try included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on exponential growth.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&IndexerConfig> for RetryConfig {
    fn from(c: &IndexerConfig) -> Self {
        Self {
            max_attempts: c.max_retries.max(1),
            base_delay: Duration::from_millis(c.base_delay_ms),
            max_delay: Duration::from_millis(c.max_delay_ms),
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay to wait after the `failures`-th consecutive failure
    /// (1-based): `base * 2^(failures-1)`, capped. `None` once the attempt
    /// budget is spent.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures >= self.config.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        let delay = self
            .config
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay);
        Some(delay.min(self.config.max_delay))
    }
}
