use serde::Deserialize;

use crate::config::Config;
use crate::encoding::Encoding;
use crate::{Error, Result};

const DEFAULT_AGGREGATION_SIZE: usize = 1;

pub fn producer_key(name: &str) -> String {
    format!("stream.producer.{name}")
}

/// ProducerSettings are read from `stream.producer.<name>`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProducerSettings {
    /// Name of the output (sink) the producer writes to.
    pub output: String,
    #[serde(default)]
    pub encoding: Encoding,
    /// Number of messages packed into one aggregate, 1 disables aggregation.
    #[serde(default = "default_aggregation_size")]
    pub aggregation_size: usize,
}

fn default_aggregation_size() -> usize {
    DEFAULT_AGGREGATION_SIZE
}

impl ProducerSettings {
    pub fn from_config(config: &Config, name: &str) -> Result<Self> {
        let settings: ProducerSettings = config.unmarshal_key(&producer_key(name))?;
        if settings.output.is_empty() {
            return Err(Error::Config(format!("producer {name} has no output")));
        }
        if settings.aggregation_size < 1 {
            return Err(Error::Config(format!(
                "aggregation_size of producer {name} must be at least 1"
            )));
        }
        if settings.encoding == Encoding::Aggregate {
            return Err(Error::Config(format!(
                "producer {name} can not use the aggregate encoding for models"
            )));
        }
        Ok(settings)
    }
}
