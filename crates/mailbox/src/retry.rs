use std::time::Duration;

/// Backoff schedule used while a blocking read waits for the next write.
///
/// Starts fine-grained so a frame published immediately after the poll is
/// picked up with sub-millisecond latency, and caps quickly so a quiet
/// channel costs a bounded number of wakeups per second.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    /// Initial delay between polls (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap (backoff won't exceed this).
    pub max_delay: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_micros(200),
            max_delay: Duration::from_millis(5),
        }
    }
}

impl PollBackoff {
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let backoff = PollBackoff::default();

        assert_eq!(backoff.delay_for_attempt(0), Duration::from_micros(200));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_micros(400));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_micros(800));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_micros(1600));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_micros(3200));
        // Capped from here on.
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_millis(5));
        assert_eq!(backoff.delay_for_attempt(30), Duration::from_millis(5));
    }

    #[test]
    fn custom_backoff() {
        let backoff = PollBackoff {
            base_delay: Duration::from_micros(50),
            max_delay: Duration::from_micros(300),
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_micros(50));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_micros(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_micros(300));
    }
}
