use std::time::Duration;

use serde::Deserialize;

use crate::config::Config;
use crate::encoding::Encoding;
use crate::{Error, Result};

const DEFAULT_RUNNER_COUNT: usize = 1;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BATCH_SIZE: usize = 1;

pub fn consumer_key(name: &str) -> String {
    format!("stream.consumer.{name}")
}

/// ConsumerSettings configures a consumer engine, read from `stream.consumer.<name>`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsumerSettings {
    /// Name of the input the consumer reads from.
    pub input: String,
    #[serde(default = "default_runner_count")]
    pub runner_count: usize,
    /// No data for this long, together with a completed source, finalizes the drain.
    #[serde(
        default = "default_idle_timeout",
        deserialize_with = "crate::config::duration::deserialize"
    )]
    pub idle_timeout: Duration,
    /// Max messages a runner takes from the stream per receive.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub encoding: Encoding,
}

fn default_runner_count() -> usize {
    DEFAULT_RUNNER_COUNT
}

fn default_idle_timeout() -> Duration {
    DEFAULT_IDLE_TIMEOUT
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl ConsumerSettings {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            runner_count: DEFAULT_RUNNER_COUNT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            encoding: Encoding::default(),
        }
    }

    pub fn runner_count(mut self, runner_count: usize) -> Self {
        self.runner_count = runner_count;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn from_config(config: &Config, name: &str) -> Result<Self> {
        let settings: ConsumerSettings = config.unmarshal_key(&consumer_key(name))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.is_empty() {
            return Err(Error::Config("consumer input must not be empty".to_string()));
        }
        if self.runner_count < 1 {
            return Err(Error::Config(format!(
                "runner_count must be at least 1, got {}",
                self.runner_count
            )));
        }
        if self.batch_size < 1 {
            return Err(Error::Config(format!(
                "batch_size must be at least 1, got {}",
                self.batch_size
            )));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::Config("idle_timeout must be positive".to_string()));
        }
        Ok(())
    }
}
