//! Reconnect backoff.

use std::time::Duration;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Growth factor between attempts.
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial: Duration::from_millis(100), max: Duration::from_secs(5), multiplier: 2 }
    }
}

/// Exponential backoff state for one link.
///
/// Delays grow from `initial` by `multiplier` per failed attempt and are
/// capped at `max`. A successful handshake calls [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff starting at `config.initial`.
    pub fn new(config: BackoffConfig) -> Self {
        Self { current: config.initial, config, attempts: 0 }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.config.max);
        self.attempts = self.attempts.saturating_add(1);
        self.current =
            self.current.saturating_mul(self.config.multiplier.max(1)).min(self.config.max);
        delay
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.config.initial;
        self.attempts = 0;
    }
}
