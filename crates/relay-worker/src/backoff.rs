//! Retry redelivery delays.

use std::time::Duration;

use rand::Rng;

/// Delay before the Nth retry: exponential from `base`, capped at
/// `cap`, with full jitter so a burst of failures does not redeliver
/// in lockstep. `attempt` is the lease counter of the attempt that
/// just failed (1-based).
pub fn retry_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ceiling = base
        .saturating_mul(2u32.saturating_pow(exp))
        .min(cap)
        .as_millis() as u64;
    let jittered = rand::rng().random_range(0..=ceiling);
    Duration::from_millis(jittered)
}
