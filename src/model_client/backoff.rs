//! Exponential backoff shared by the Model Client's retry policy (§4.3, §9).

use std::time::Duration;

/// `base * 2^attempt`, capped at `max`. A single configurable backoff used
/// for every retryable model error rather than a policy that varies per
/// call site.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let scaled = (base.as_millis() as u64).saturating_mul(multiplier);
    Duration::from_millis(scaled.min(max.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_per_attempt() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(10_000);
        assert_eq!(backoff_delay(0, base, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, base, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, base, max), Duration::from_millis(400));
    }

    #[test]
    fn caps_at_max() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        assert_eq!(backoff_delay(10, base, max), max);
    }
}
