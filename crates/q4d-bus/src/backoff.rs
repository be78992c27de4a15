//! Reconnect delay schedule.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`, plus up
//! to `jitter` of that clamped value chosen at random. The base never depends
//! on earlier jittered values.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with additive jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectBackoff {
    /// Delay before the first retry.
    pub first: Duration,
    /// Cap applied before jitter.
    pub max: Duration,
    /// Growth per attempt.
    pub factor: f64,
    /// Upper bound of the added jitter as a fraction of the base delay.
    pub jitter: f64,
}

impl Default for ReconnectBackoff {
    /// 1s doubling to 60s with up to 20% jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl ReconnectBackoff {
    /// Delay before the base is jittered, for attempt `attempt` (0-indexed).
    #[must_use]
    pub fn base(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Jittered delay for attempt `attempt` (0-indexed).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = rand::rng().random_range(0.0..=self.jitter);
        base + base.mul_f64(spread)
    }
}
