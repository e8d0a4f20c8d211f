//! Backoff strategies for retry sleeps.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How inter-attempt delays grow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base · 2^(n-1)`
    #[default]
    Exponential,
    /// `base · n`
    Linear,
    /// `base`
    Constant,
}

impl BackoffStrategy {
    /// Raw delay before attempt `attempt + 1`, where `attempt` counts the
    /// attempts already made (1-based).
    #[must_use]
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                base.saturating_mul(factor)
            }
            BackoffStrategy::Linear => base.saturating_mul(attempt),
            BackoffStrategy::Constant => base,
        }
    }

    /// Delay with ±10% uniform jitter applied, clamped to `max`.
    #[must_use]
    pub fn jittered_delay(&self, base: Duration, max: Duration, attempt: u32) -> Duration {
        let raw = self.delay(base, attempt);
        let factor: f64 = rand::rng().random_range(0.9..=1.1);
        let jittered = raw.mul_f64(factor);
        jittered.min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_shapes() {
        let base = Duration::from_millis(10);
        assert_eq!(
            BackoffStrategy::Exponential.delay(base, 3),
            Duration::from_millis(40)
        );
        assert_eq!(
            BackoffStrategy::Linear.delay(base, 3),
            Duration::from_millis(30)
        );
        assert_eq!(
            BackoffStrategy::Constant.delay(base, 3),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn jitter_stays_clamped() {
        let base = Duration::from_millis(50);
        let max = Duration::from_millis(60);
        for attempt in 1..=8 {
            let d = BackoffStrategy::Exponential.jittered_delay(base, max, attempt);
            assert!(d <= max, "attempt {attempt}: {d:?} > {max:?}");
        }
    }

    #[test]
    fn jitter_within_ten_percent_below_clamp() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(10);
        for _ in 0..100 {
            let d = BackoffStrategy::Constant.jittered_delay(base, max, 1);
            assert!(d >= Duration::from_millis(90));
            assert!(d <= Duration::from_millis(110));
        }
    }
}
