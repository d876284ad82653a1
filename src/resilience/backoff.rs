//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Exponential delay for a 1-based attempt, without jitter.
///
/// `base × multiplier^(attempt-1)`, capped at `max`.
pub fn exponential_delay(attempt: u32, base: Duration, multiplier: f64, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let secs = base.as_secs_f64() * multiplier.powi(exponent);
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }
    Duration::from_secs_f64(secs.max(0.0))
}

/// Exponential delay with ±`jitter` (fraction of the delay) applied.
pub fn calculate_backoff(
    attempt: u32,
    base: Duration,
    multiplier: f64,
    max: Duration,
    jitter: f64,
) -> Duration {
    let delay = exponential_delay(attempt, base, multiplier, max);
    apply_jitter(delay, jitter)
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let jitter = jitter.min(1.0);
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
