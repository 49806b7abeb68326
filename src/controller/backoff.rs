//! Retry backoff and tick jitter

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fraction of the base interval a tick may deviate by, in either direction.
pub const TICK_JITTER_FACTOR: f64 = 0.1;

/// Bounded exponential backoff for failed reconciliation cycles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Total tries of one cycle, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Delay before retry number `retry` (0-based): `initial * multiplier^retry`,
/// capped at `max_delay`.
pub fn calculate_backoff(retry: u32, config: &BackoffConfig) -> Duration {
    let factor = config.multiplier.max(1.0).powi(retry.min(63) as i32);
    let delay_secs = config.initial_delay.as_secs_f64() * factor;
    let max_secs = config.max_delay.as_secs_f64();

    if !delay_secs.is_finite() || delay_secs >= max_secs {
        config.max_delay
    } else {
        Duration::from_secs_f64(delay_secs)
    }
}

/// `base` with uniform jitter of `±factor`, drawn fresh on every call.
pub fn jittered_interval(base: Duration, factor: f64) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    if factor == 0.0 || base.is_zero() {
        return base;
    }
    let offset = rand::thread_rng().gen_range(-factor..=factor);
    base.mul_f64(1.0 + offset)
}
