//! Exponential reconnect backoff with jitter.
//!
//! Delay for attempt `n` (0-based) is `min(base * 2^n + jitter, cap)`,
//! with `jitter` drawn uniformly from `0..=max_jitter`. Attempts are
//! unbounded; the counter resets after every successful connection.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Tracks consecutive failed connection attempts and yields the next delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff at attempt zero.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Deterministic part of the delay for `attempt`: `min(base * 2^attempt, cap)`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.config
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.max_delay)
    }

    /// Delay to wait before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        let jitter = random_jitter(self.config.max_jitter);
        self.attempt = self.attempt.saturating_add(1);
        base.saturating_add(jitter).min(self.config.max_delay)
    }

    /// Back to attempt zero after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
