//! Exponential reconnect backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

/// Doubling delay schedule `base, 2*base, 4*base, ...` capped at `max`.
///
/// Jitter adds up to `jitter_ratio` of the current step and the result is
/// capped again, so with `jitter_ratio <= 1.0` the sequence never decreases.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_ratio: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let step = self.step(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter_ratio == 0.0 || step >= self.max {
            return step;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        step.mul_f64(1.0 + extra).min(self.max)
    }

    /// Back to `base` after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn step(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }
}
