//! Exponential backoff used by the sinks to retry partially failed batches.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_MAX_ATTEMPTS: u16 = 10;
const DEFAULT_FACTOR: f64 = 2.0;
const DEFAULT_JITTER: f64 = 0.0;

/// Backoff parameters of a sink, read from the `backoff` key of its settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    #[serde(deserialize_with = "crate::config::duration::deserialize")]
    pub initial_interval: Duration,
    #[serde(deserialize_with = "crate::config::duration::deserialize")]
    pub max_interval: Duration,
    /// Zero retries forever.
    pub max_attempts: u16,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            factor: DEFAULT_FACTOR,
            jitter: DEFAULT_JITTER,
        }
    }
}

/// Delays grow as `initial_interval * factor^(attempt - 1)`, capped at `max_interval`,
/// with an optional jitter in `[1 - jitter, 1 + jitter]`. The iterator ends once
/// `max_attempts` delays were handed out.
#[derive(Debug, Clone)]
pub struct Exponential {
    initial_interval: Duration,
    max_interval: Duration,
    factor: f64,
    jitter: f64,
    max_attempts: Option<u16>,
    current_attempt: u16,
}

impl Exponential {
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        factor: f64,
        jitter: f64,
        max_attempts: Option<u16>,
    ) -> Self {
        Self {
            initial_interval,
            max_interval,
            factor,
            jitter: jitter.clamp(0.0, 1.0),
            max_attempts,
            current_attempt: 0,
        }
    }

    pub fn current_attempt(&self) -> u16 {
        self.current_attempt
    }

    fn calculate_delay(&self, attempt: u16) -> Duration {
        // attempt is at least 1, powi(-1) would shrink the delay
        let attempt = attempt.max(1);
        let base_delay_ms = (self.initial_interval.as_millis() as f64)
            * self.factor.powi(i32::from(attempt - 1));

        if self.jitter == 0.0 {
            return Duration::from_millis(base_delay_ms as u64).min(self.max_interval);
        }

        let jitter_factor: f64 = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_millis((base_delay_ms * jitter_factor) as u64).min(self.max_interval)
    }
}

impl From<&BackoffSettings> for Exponential {
    fn from(settings: &BackoffSettings) -> Self {
        let max_attempts = match settings.max_attempts {
            0 => None,
            n => Some(n),
        };
        Exponential::new(
            settings.initial_interval,
            settings.max_interval,
            settings.factor,
            settings.jitter,
            max_attempts,
        )
    }
}

impl Iterator for Exponential {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(max_attempts) = self.max_attempts
            && self.current_attempt >= max_attempts
        {
            return None;
        }

        self.current_attempt = self.current_attempt.saturating_add(1);
        Some(self.calculate_delay(self.current_attempt))
    }
}
