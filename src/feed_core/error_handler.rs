use {rand::Rng, std::time::Duration};

/// Capped exponential reconnect delay with jitter. Never gives up; the cap
/// only bounds how long a single wait can be.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max.max(initial),
            current_attempt: 0,
        }
    }

    /// Delay for the next attempt and advance the attempt counter.
    ///
    /// The delay is drawn from `[base / 2, base]` where `base` doubles each
    /// attempt up to the cap, so it never drops below half the initial delay.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.current_attempt.min(16)).unwrap_or(u32::MAX);
        let base = self
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        self.current_attempt = self.current_attempt.saturating_add(1);

        let base_ms = base.as_millis() as u64;
        if base_ms < 2 {
            return base;
        }
        Duration::from_millis(rand::thread_rng().gen_range(base_ms / 2..=base_ms))
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
