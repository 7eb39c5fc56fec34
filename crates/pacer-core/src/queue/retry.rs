//! Retry policy: decides whether to retry, how long to wait, and how much
//! priority a retried request gains.

use std::time::Duration;

/// Retry policy for failed requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub retry_limit: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Cap on the priority boost; `None` keeps boosting on every retry.
    pub max_priority_boost: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_priority_boost: None,
        }
    }
}

impl RetryPolicy {
    /// Does a request that has already been retried `retry_count` times get
    /// another try?
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.retry_limit
    }

    /// Delay before retry number `retry_count` (1-indexed).
    ///
    /// delay = base_delay * multiplier^(retry_count - 1)
    ///
    /// With base_delay=1s, multiplier=2.0:
    /// - retry 1: 1s
    /// - retry 2: 2s
    /// - retry 3: 4s
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry_count.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }

    /// Effective priority of a request after `retry_count` retries.
    ///
    /// Each retry adds one so a retried request runs ahead of fresh requests
    /// with the same base priority.
    pub fn boosted_priority(&self, base: i32, retry_count: u32) -> i32 {
        let boost = match self.max_priority_boost {
            Some(cap) => retry_count.min(cap),
            None => retry_count,
        };
        base.saturating_add(i32::try_from(boost).unwrap_or(i32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1000)]
    #[case(2, 2000)]
    #[case(3, 4000)]
    #[case(4, 8000)]
    fn exponential_backoff_doubles(#[case] retry: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(retry), Duration::from_millis(expected_ms));
    }

    #[test]
    fn custom_multiplier_is_applied() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            multiplier: 3.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.next_delay(1), Duration::from_millis(100));
        assert_eq!(policy.next_delay(3), Duration::from_millis(900));
    }

    #[test]
    fn huge_retry_counts_saturate() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(u32::MAX), Duration::MAX);
    }

    #[rstest]
    #[case(0, true)]
    #[case(2, true)]
    #[case(3, false)]
    #[case(7, false)]
    fn retry_limit_is_respected(#[case] retry_count: u32, #[case] expected: bool) {
        assert_eq!(RetryPolicy::default().should_retry(retry_count), expected);
    }

    #[test]
    fn zero_limit_never_retries() {
        let policy = RetryPolicy {
            retry_limit: 0,
            ..RetryPolicy::default()
        };
        assert!(!policy.should_retry(0));
    }

    #[rstest]
    #[case(None, 0, 5, 5)]
    #[case(None, 0, 40, 40)]
    #[case(Some(2), 0, 5, 2)]
    #[case(Some(2), -3, 1, -2)]
    #[case(None, i32::MAX, 3, i32::MAX)]
    fn priority_boost(
        #[case] cap: Option<u32>,
        #[case] base: i32,
        #[case] retries: u32,
        #[case] expected: i32,
    ) {
        let policy = RetryPolicy {
            max_priority_boost: cap,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.boosted_priority(base, retries), expected);
    }
}
