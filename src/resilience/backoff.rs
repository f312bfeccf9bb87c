//! Jittered exponential backoff.

use rand::Rng;
use std::time::Duration;

/// Delays of `base * 2^(attempt-1)`, capped at `max`, plus up to a tenth of
/// that on top so that callers retrying together spread out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before jitter after failed attempt `attempt` (1-based).
    /// Attempt 0 waits nothing.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Jittered delay after failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let spread = ceiling / 10;
        if spread.is_zero() {
            return ceiling;
        }
        ceiling + spread.mul_f64(rand::thread_rng().gen::<f64>())
    }
}
