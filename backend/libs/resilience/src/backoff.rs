/// Exponential backoff with jitter for background retry loops
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial: Duration,
    /// Upper bound for any single delay
    pub max: Duration,
    /// Add random jitter to the delay (±30%)
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(300),
            jitter: false,
        }
    }
}

/// Delay for the given attempt: `initial * 2^attempt`, capped at `max`.
pub fn exponential_backoff(config: &BackoffConfig, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.min(32));
    let base_ms = (config.initial.as_millis() as u64)
        .saturating_mul(factor)
        .min(config.max.as_millis() as u64);

    if config.jitter {
        let mut rng = rand::thread_rng();
        let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3);
        Duration::from_millis((base_ms as f64 * jitter_factor) as u64)
    } else {
        Duration::from_millis(base_ms)
    }
}
