//! Retry schedule for the reconnect path

use std::time::Duration;

use kf_core::config::ReconnectConfig;

/// Exponential backoff with jitter plus a bounded attempt budget
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
    attempts: u32,
    max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            config.initial,
            config.max,
            config.multiplier,
            config.jitter,
            config.max_attempts,
        )
    }

    pub fn new(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            current: initial,
            max,
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
            attempts: 0,
            max_attempts,
        }
    }

    /// Count a failed attempt; `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;

        let delay = self.current;
        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = next.min(self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        Some(delay + Duration::from_secs_f64(jitter_amount))
    }

    /// Failed attempts counted so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
