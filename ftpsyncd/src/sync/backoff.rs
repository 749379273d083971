use rand::Rng;
use std::time::Duration;

const DEFAULT_BASE: Duration = Duration::from_millis(500);
const DEFAULT_MAX: Duration = Duration::from_secs(10);

/// Exponential retry delay: `base * 2^attempt`, capped at `max`, optionally
/// drawn uniformly from `0..=delay` ("full jitter").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// Retries immediately.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, false)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self
            .base
            .checked_mul(1u32 << attempt.min(16))
            .unwrap_or(self.max)
            .min(self.max);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=millis))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_MAX, true)
    }
}
