use std::time::Duration;

/// Fixed-delay retry bound for session saves. The delay does not grow
/// between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait between two attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based), or `None`
    /// when the attempts are exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt < self.max_attempts {
            Some(self.delay)
        } else {
            None
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_fixed_until_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay_after(3), None);
    }

    #[test]
    fn at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_after(1), None);
    }
}
