//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

use nl_domain::ClientConfig;
use rand::Rng;

/// Controls how the connection retries after an unexpected drop.
///
/// `delay(1) = retry_delay`, and every following delay is
/// `min(previous * backoff_multiplier + jitter, max_retry_delay)` where the
/// jitter is drawn uniformly from `0..=max_jitter`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of attempts before giving up.
    pub max_retries: u32,
    /// Delay before the first attempt.
    pub retry_delay: Duration,
    /// Cap applied to every delay.
    pub max_retry_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound of the random term added per step.
    pub max_jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            max_retry_delay: config.max_retry_delay(),
            backoff_multiplier: config.backoff_multiplier,
            max_jitter: config.max_jitter(),
        }
    }

    /// Delay before attempt 1.
    pub fn first_delay(&self) -> Duration {
        self.retry_delay.min(self.max_retry_delay)
    }

    /// Delay before the attempt following one that waited `previous`.
    pub fn next_delay(&self, previous: Duration) -> Duration {
        let grown_ms = previous.as_millis() as f64 * self.backoff_multiplier;
        let next_ms = grown_ms + self.jitter_ms();
        let capped_ms = next_ms.min(self.max_retry_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether `attempts` failed attempts exhaust the budget.
    pub fn should_give_up(&self, attempts: u32) -> bool {
        attempts >= self.max_retries
    }

    /// The full schedule: `(attempt, delay)` for attempt `1..=max_retries`.
    pub fn schedule(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            attempt: 0,
            previous: None,
        }
    }

    fn jitter_ms(&self) -> f64 {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return 0.0;
        }
        rand::thread_rng().gen_range(0..=max) as f64
    }
}

/// Iterator over the delays of one reconnection cycle.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a ReconnectPolicy,
    attempt: u32,
    previous: Option<Duration>,
}

impl Iterator for Backoff<'_> {
    type Item = (u32, Duration);

    fn next(&mut self) -> Option<Self::Item> {
        if self.policy.should_give_up(self.attempt) {
            return None;
        }
        self.attempt += 1;
        let delay = match self.previous {
            None => self.policy.first_delay(),
            Some(prev) => self.policy.next_delay(prev),
        };
        self.previous = Some(delay);
        Some((self.attempt, delay))
    }
}
