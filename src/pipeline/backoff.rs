use std::time::Duration;

/// Inter-cycle sleep that grows while the platform or feeds misbehave.
///
/// Doubles after a cycle with a transient failure, up to `max`, and halves
/// back toward `base` after each clean cycle.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn on_failure(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
        tracing::debug!(sleep_secs = self.current.as_secs(), "Backing off");
    }

    pub fn on_success(&mut self) {
        self.current = (self.current / 2).max(self.base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_doubles_up_to_max() {
        let mut backoff = Backoff::new(secs(60), secs(300));
        backoff.on_failure();
        assert_eq!(backoff.current(), secs(120));
        backoff.on_failure();
        assert_eq!(backoff.current(), secs(240));
        backoff.on_failure();
        assert_eq!(backoff.current(), secs(300));
        backoff.on_failure();
        assert_eq!(backoff.current(), secs(300));
    }

    #[test]
    fn test_halves_back_to_base() {
        let mut backoff = Backoff::new(secs(60), secs(600));
        for _ in 0..3 {
            backoff.on_failure();
        }
        assert_eq!(backoff.current(), secs(480));

        backoff.on_success();
        assert_eq!(backoff.current(), secs(240));
        backoff.on_success();
        backoff.on_success();
        backoff.on_success();
        assert_eq!(backoff.current(), secs(60));
    }

    #[test]
    fn test_max_below_base_is_raised() {
        let mut backoff = Backoff::new(secs(60), secs(10));
        backoff.on_failure();
        assert_eq!(backoff.current(), secs(60));
    }
}
