use std::time::Duration;

/// Exponential backoff between report delivery attempts.
///
/// Cooldown starts at `base` and grows ×1.5 per failure, capped at `cap`.
#[derive(Clone, Debug)]
pub struct RetryState {
    pub attempts: u32,
    pub max_attempts: u32,
    pub current_cooldown: Duration,
    pub cap: Duration,
}

impl RetryState {
    pub fn new(max_attempts: u32, base_cooldown: Duration, cap: Duration) -> Self {
        RetryState {
            attempts: 0,
            max_attempts,
            current_cooldown: base_cooldown,
            cap,
        }
    }

    /// Record a failed attempt and return how long to wait before the next
    /// one, or `None` once attempts are exhausted.
    pub fn record_failed_attempt(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if !self.can_retry() {
            return None;
        }

        let wait = self.current_cooldown;
        self.current_cooldown = Duration::from_secs_f64(
            (self.current_cooldown.as_secs_f64() * 1.5).min(self.cap.as_secs_f64()),
        );
        Some(wait.min(self.cap))
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn status(&self) -> String {
        if self.can_retry() {
            format!(
                "attempt {}/{} (next wait {:.1}s)",
                self.attempts,
                self.max_attempts,
                self.current_cooldown.as_secs_f64()
            )
        } else {
            format!("MAX_ATTEMPTS_EXCEEDED ({})", self.max_attempts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let mut state = RetryState::new(5, Duration::from_secs(2), Duration::from_secs(30));

        let first = state.record_failed_attempt().unwrap();
        assert_eq!(first, Duration::from_secs(2));

        let second = state.record_failed_attempt().unwrap();
        assert_eq!(second, Duration::from_secs(3));

        let third = state.record_failed_attempt().unwrap();
        assert!(third > second);
    }

    #[test]
    fn test_backoff_capped() {
        let mut state = RetryState::new(50, Duration::from_secs(20), Duration::from_secs(30));
        for _ in 0..10 {
            if let Some(wait) = state.record_failed_attempt() {
                assert!(wait <= Duration::from_secs(30));
            }
        }
    }

    #[test]
    fn test_max_attempts() {
        let mut state = RetryState::new(2, Duration::from_secs(1), Duration::from_secs(30));
        assert!(state.can_retry());

        assert!(state.record_failed_attempt().is_some());
        assert!(state.record_failed_attempt().is_none());
        assert!(!state.can_retry());
        assert!(state.status().contains("MAX_ATTEMPTS_EXCEEDED"));
    }

    #[test]
    fn test_single_attempt_never_waits() {
        let mut state = RetryState::new(1, Duration::from_secs(2), Duration::from_secs(30));
        assert!(state.record_failed_attempt().is_none());
    }
}
