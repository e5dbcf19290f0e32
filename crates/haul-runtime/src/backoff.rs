//! Exponential backoff with proportional jitter.

use std::time::Duration;

use haul_config::ControllerPolicy;
use rand::Rng;

/// Highest doubling step; past this the cap always applies.
const MAX_EXPONENT: u32 = 16;

/// Delay sequence `initial · 2ⁿ`, capped at `max`, each value scaled by a
/// random factor in `[1 - jitter, 1 + jitter]` and re-capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// Build a sequence from explicit bounds.
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max,
            jitter,
            attempt: 0,
        }
    }

    /// Build the start/promote retry sequence configured for controllers.
    #[must_use]
    pub const fn from_policy(policy: &ControllerPolicy) -> Self {
        Self::new(policy.backoff_initial, policy.backoff_max, policy.backoff_jitter)
    }

    /// Delays handed out so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Next delay using the thread-local generator.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::rng())
    }

    /// Next delay drawing jitter from `rng`.
    pub fn next_delay_with<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let exponent = self.attempt.min(MAX_EXPONENT);
        self.attempt = self.attempt.saturating_add(1);
        let base = self
            .initial
            .saturating_mul(1 << exponent)
            .min(self.max);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rng.random_range(1.0 - self.jitter..=1.0 + self.jitter);
        base.mul_f64(factor).min(self.max)
    }

    /// Restart the sequence from `initial`.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn doubles_until_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 0.0);
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(backoff.attempts(), 7);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_band() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut backoff = Backoff::new(Duration::from_secs(4), Duration::from_secs(60), 0.25);
        for _ in 0..200 {
            backoff.reset();
            let delay = backoff.next_delay_with(&mut rng);
            assert!(delay >= Duration::from_secs(3), "{delay:?}");
            assert!(delay <= Duration::from_secs(5), "{delay:?}");
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut backoff = Backoff::new(Duration::from_secs(8), Duration::from_secs(10), 0.5);
        for _ in 0..100 {
            assert!(backoff.next_delay_with(&mut rng) <= Duration::from_secs(10));
        }
    }

    #[test]
    fn very_long_sequences_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 0.0);
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }
}
