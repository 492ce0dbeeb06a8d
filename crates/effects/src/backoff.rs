use std::time::Duration;

/// Exponential delay schedule with a bounded number of attempts.
///
/// The first call to [`next_delay`](Self::next_delay) yields the initial
/// delay; each later call multiplies it, capped at `max`. Once the attempt
/// budget is spent it yields `None`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    attempt: u32,
    max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            attempt: 0,
            max_attempts: u32::MAX,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let factor = self.multiplier.powi(self.attempt.min(i32::MAX as u32) as i32);
        let delay_ms = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);

        self.attempt += 1;
        Some(Duration::from_millis(delay_ms as u64))
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn current_attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(2)).with_max_attempts(3)
    }
}
