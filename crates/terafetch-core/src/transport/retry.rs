//! Exponential backoff with jitter for transport-level retries.

use rand::Rng;
use std::time::Duration;

/// Retry schedule: `base * multiplier^(attempt-1)`, capped, with symmetric
/// random jitter so synchronized workers do not hammer the server in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter fraction (0.1 = +-10%).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based: 1 = first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let mut delay = self.base_delay.as_secs_f64() * self.multiplier.powi(exp as i32);
        if self.jitter > 0.0 {
            let swing = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            delay += delay * swing;
        }
        if delay > self.max_delay.as_secs_f64() {
            delay = self.max_delay.as_secs_f64();
        }
        if delay < 0.0 {
            delay = self.base_delay.as_secs_f64();
        }
        Duration::from_secs_f64(delay)
    }
}
