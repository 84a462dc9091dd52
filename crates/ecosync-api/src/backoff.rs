//! Exponential backoff shared by feed reconnection and mutation retries.

use std::time::Duration;

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
///
/// Jitter is ±25% to spread out reconnection storms from many clients.
/// It is seeded from the attempt number, so the same attempt always
/// yields the same delay.
pub fn exponential_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = initial.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(max.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_increases_exponentially() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        let d0 = exponential_backoff(0, initial, max);
        let d1 = exponential_backoff(1, initial, max);
        let d2 = exponential_backoff(2, initial, max);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let d = exponential_backoff(40, Duration::from_secs(1), Duration::from_secs(10));
        // With jitter factor up to 1.25, max effective is 12.5s
        assert!(d <= Duration::from_millis(12_500), "delay {d:?} not capped");
    }

    #[test]
    fn backoff_is_deterministic() {
        let a = exponential_backoff(3, Duration::from_secs(2), Duration::from_secs(300));
        let b = exponential_backoff(3, Duration::from_secs(2), Duration::from_secs(300));
        assert_eq!(a, b);
    }
}
