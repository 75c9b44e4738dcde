use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter, shared by SIN fan-out, the IAF HTTP
/// client, ANC dispatch, and the ANC escalation worker (§4.4):
///
/// `delay = min(max, initial * 2^attempt) + uniform(0, 0.25 * delay)`
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Computed delay for `attempt` (0-indexed), before any `Retry-After`
    /// override. Jitter is applied through the supplied RNG so callers can
    /// use a deterministic source in tests.
    pub fn delay_for(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let exp = 2u64.saturating_pow(attempt.min(32));
        let base = self
            .initial
            .saturating_mul(exp as u32)
            .min(self.max);
        let jitter_max = base.mul_f64(0.25);
        let jitter = if jitter_max.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(rng.gen_range(0.0..jitter_max.as_secs_f64().max(f64::MIN_POSITIVE)))
        };
        base + jitter
    }

    /// Delay honoring an upstream `Retry-After` hint when present; the
    /// hint always overrides the computed delay on 429/503 (§4.4, §4.2).
    pub fn delay_with_retry_after(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        rng: &mut impl Rng,
    ) -> Duration {
        retry_after.unwrap_or_else(|| self.delay_for(attempt, rng))
    }
}
