//! Retry delays for transient apply failures.

use std::time::Duration;

use rand::Rng;

use offsync_core::AppConfig;

/// Exponential backoff with jitter, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base) }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(Duration::from_millis(config.backoff_base_ms), Duration::from_millis(config.backoff_max_ms))
    }

    /// Upper bound of the delay after `retry_count` earlier failures:
    /// `min(max, base * 2^retry_count)`.
    pub fn ceiling(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count.min(31)).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    /// Jittered delay drawn uniformly from `[ceiling / 2, ceiling]`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let ceiling = self.ceiling(retry_count).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(ceiling / 2..=ceiling);
        Duration::from_millis(jittered)
    }
}
