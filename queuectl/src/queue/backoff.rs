//! Retry backoff policy.

use rand::RngExt;
use serde::{Deserialize, Serialize};

/// Delay in whole seconds before retry number `attempts`.
///
/// The delay is `max(1, base^attempts)`, capped at `cap` when given. With
/// `jitter` the result is scaled by a uniform factor in `[0.5, 1.5]` and
/// floored, never dropping below one second.
pub fn compute_delay(attempts: u32, base: u64, cap: Option<u64>, jitter: bool) -> u64 {
    let mut delay = base.saturating_pow(attempts).max(1);
    if let Some(cap) = cap {
        delay = delay.min(cap);
    }
    if jitter {
        let factor = rand::rng().random_range(JITTER_MIN..=JITTER_MAX);
        delay = scale(delay, factor);
    }
    delay
}

const JITTER_MIN: f64 = 0.5;
const JITTER_MAX: f64 = 1.5;

/// `delay * factor`, floored, at least one second.
fn scale(delay: u64, factor: f64) -> u64 {
    ((delay as f64 * factor).floor() as u64).max(1)
}

/// Backoff parameters shared by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Exponential base, in seconds.
    pub base: u64,
    /// Upper bound for a single delay, in seconds.
    pub max: u64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: 2,
            max: 600,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Seconds to wait after the `attempts`-th failure, bounded by `max`.
    pub fn delay_for(&self, attempts: u32) -> u64 {
        compute_delay(attempts, self.base, Some(self.max), self.jitter).min(self.max)
    }
}
