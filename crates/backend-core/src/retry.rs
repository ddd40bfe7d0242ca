use std::time::Duration;

/// Backoff between change-feed resubscribe attempts.
///
/// Attempt `n` waits `base * 2^n`, raised to any server retry-after hint and
/// capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    /// Build from millisecond bounds. A cap below the base is raised to it.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        let base = Duration::from_millis(base_delay_ms);
        Self {
            base,
            max: Duration::from_millis(max_delay_ms).max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let backoff = self.base.saturating_mul(factor);
        let hint = retry_after_hint_ms.map(Duration::from_millis).unwrap_or_default();
        backoff.max(hint).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(500, 30_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(policy: &RetryPolicy, attempts: std::ops::Range<u32>) -> Vec<u128> {
        attempts
            .map(|attempt| policy.delay_for_attempt(attempt, None).as_millis())
            .collect()
    }

    #[test]
    fn default_resubscribe_schedule_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(
            millis(&policy, 0..8),
            vec![500, 1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]
        );
    }

    #[test]
    fn huge_attempt_counts_saturate_at_cap() {
        let policy = RetryPolicy::new(10, 250);
        assert_eq!(policy.delay_for_attempt(u32::MAX, None), Duration::from_millis(250));
    }

    #[test]
    fn rate_limit_hint_wins_over_shorter_backoff() {
        let policy = RetryPolicy::new(100, 20_000);
        assert_eq!(
            policy.delay_for_attempt(0, Some(3_000)),
            Duration::from_millis(3_000)
        );
        assert_eq!(
            policy.delay_for_attempt(0, Some(60_000)),
            Duration::from_millis(20_000)
        );
    }

    #[test]
    fn cap_below_base_is_raised() {
        let policy = RetryPolicy::new(2_000, 100);
        assert_eq!(policy.max(), policy.base());
        assert_eq!(policy.delay_for_attempt(3, None), Duration::from_secs(2));
    }
}
