use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
            strategy: BackoffStrategy::Exponential,
            jitter: true,
        }
    }
}

/// Consecutive-failure backoff for flush ticks.
///
/// The first retryable failure only waits for the next tick. From the second
/// consecutive failure on, ticks inside the computed window are skipped. Any
/// success or terminal outcome resets the window.
#[derive(Debug)]
pub struct FlushBackoff {
    config: BackoffConfig,
    consecutive_failures: u32,
    resume_at: Option<Instant>,
}

impl FlushBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            resume_at: None,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Time left in the current window, if any.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.resume_at
            .filter(|resume_at| *resume_at > now)
            .map(|resume_at| resume_at - now)
    }

    /// Count one retryable failure and return the window it opens.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let delay = match self.consecutive_failures {
            1 => Duration::ZERO,
            n => self.calculate_delay(n - 2),
        };

        self.resume_at = (!delay.is_zero()).then(|| now + delay);
        delay
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.resume_at = None;
    }

    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_millis = self.config.base_delay.as_millis() as u64;

        let delay = match self.config.strategy {
            BackoffStrategy::Exponential => {
                let multiplier = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
                Duration::from_millis(base_millis.saturating_mul(multiplier))
            }
            BackoffStrategy::Linear => {
                Duration::from_millis(base_millis.saturating_mul(u64::from(attempt) + 1))
            }
            BackoffStrategy::Fixed => self.config.base_delay,
        };

        let capped = delay.min(self.config.max_delay);

        if self.config.jitter {
            Self::apply_jitter(capped)
        } else {
            capped
        }
    }

    fn apply_jitter(delay: Duration) -> Duration {
        let factor = rand::rng().random_range(0.5..1.5);
        Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
    }
}
