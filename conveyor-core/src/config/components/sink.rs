use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::backoff::BackoffSettings;
use crate::config::AppId;
use crate::{Error, Result};

const DEFAULT_VISIBILITY_TIMEOUT: u32 = 30;
const DEFAULT_MAX_RECEIVE_COUNT: u32 = 3;
const DEFAULT_REDIS_SERVER_NAME: &str = "default";
const DEFAULT_REDIS_BATCH_SIZE: usize = 100;
/// Kinesis does not accept more records per request.
pub const MAX_KINESIS_BATCH_SIZE: usize = 500;

pub fn output_key(name: &str) -> String {
    format!("stream.output.{name}")
}

/// Client name used when a sink does not configure one.
pub fn default_client_name(name: &str) -> String {
    format!("stream-output-{name}")
}

/// The fixed set of sink types selectable with the `type` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    File,
    InMemory,
    Kinesis,
    Multiple,
    Noop,
    Redis,
    Sns,
    Sqs,
}

impl SinkType {
    pub const ALL: [SinkType; 8] = [
        SinkType::File,
        SinkType::InMemory,
        SinkType::Kinesis,
        SinkType::Multiple,
        SinkType::Noop,
        SinkType::Redis,
        SinkType::Sns,
        SinkType::Sqs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkType::File => "file",
            SinkType::InMemory => "in_memory",
            SinkType::Kinesis => "kinesis",
            SinkType::Multiple => "multiple",
            SinkType::Noop => "noop",
            SinkType::Redis => "redis",
            SinkType::Sns => "sns",
            SinkType::Sqs => "sqs",
        }
    }
}

impl fmt::Display for SinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SinkType::ALL
            .into_iter()
            .find(|typ| typ.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown sink type {s}")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    #[default]
    Append,
    Truncate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileSinkSettings {
    pub filename: String,
    #[serde(default)]
    pub mode: FileMode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KinesisSinkSettings {
    pub stream_name: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default = "default_kinesis_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub backoff: BackoffSettings,
}

fn default_kinesis_batch_size() -> usize {
    MAX_KINESIS_BATCH_SIZE
}

impl KinesisSinkSettings {
    pub fn validate(&self) -> Result<()> {
        if self.stream_name.is_empty() {
            return Err(Error::Config("kinesis stream_name must not be empty".to_string()));
        }
        if !(1..=MAX_KINESIS_BATCH_SIZE).contains(&self.batch_size) {
            return Err(Error::Config(format!(
                "kinesis batch_size has to be between 1 and {MAX_KINESIS_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        Ok(())
    }
}

/// Sub-sinks of a `multiple` sink, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MultipleSinkSettings {
    #[serde(default)]
    pub types: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RedisSinkSettings {
    #[serde(flatten)]
    pub app_id: AppId,
    #[serde(default = "default_redis_server_name")]
    pub server_name: String,
    pub key: String,
    #[serde(default = "default_redis_batch_size")]
    pub batch_size: usize,
}

fn default_redis_server_name() -> String {
    DEFAULT_REDIS_SERVER_NAME.to_string()
}

fn default_redis_batch_size() -> usize {
    DEFAULT_REDIS_BATCH_SIZE
}

impl RedisSinkSettings {
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::Config("redis key must not be empty".to_string()));
        }
        if self.batch_size < 1 {
            return Err(Error::Config("redis batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnsSinkSettings {
    #[serde(flatten)]
    pub app_id: AppId,
    pub topic_id: String,
    #[serde(default)]
    pub client_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RedrivePolicy {
    pub enabled: bool,
    pub max_receive_count: u32,
}

impl Default for RedrivePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FifoSettings {
    pub enabled: bool,
    pub content_based_deduplication: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SqsSinkSettings {
    #[serde(flatten)]
    pub app_id: AppId,
    pub queue_id: String,
    /// In seconds.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: u32,
    #[serde(default)]
    pub redrive_policy: RedrivePolicy,
    #[serde(default)]
    pub fifo: FifoSettings,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub backoff: BackoffSettings,
}

fn default_visibility_timeout() -> u32 {
    DEFAULT_VISIBILITY_TIMEOUT
}

impl SqsSinkSettings {
    pub fn validate(&self) -> Result<()> {
        if self.queue_id.is_empty() {
            return Err(Error::Config("sqs queue_id must not be empty".to_string()));
        }
        if self.visibility_timeout == 0 {
            return Err(Error::Config(
                "sqs visibility_timeout must be greater than 0".to_string(),
            ));
        }
        if self.redrive_policy.enabled && self.redrive_policy.max_receive_count == 0 {
            return Err(Error::Config(
                "sqs redrive_policy.max_receive_count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::Config;

    #[test]
    fn test_sink_type_names() {
        for typ in SinkType::ALL {
            assert_eq!(typ.as_str().parse::<SinkType>().unwrap(), typ);
        }
        assert!("kafka".parse::<SinkType>().is_err());

        let typ: SinkType = serde_json::from_value(json!("in_memory")).unwrap();
        assert_eq!(typ, SinkType::InMemory);
    }

    #[test]
    fn test_sqs_settings() {
        let config = Config::new(json!({
            "stream": {"output": {"events": {
                "type": "sqs",
                "queue_id": "events",
                "family": "billing",
                "fifo": {"enabled": true},
                "redrive_policy": {"enabled": true},
                "backoff": {"max_attempts": 3}
            }}}
        }))
        .unwrap();

        let settings: SqsSinkSettings = config.unmarshal_key(&output_key("events")).unwrap();
        assert_eq!(settings.queue_id, "events");
        assert_eq!(settings.app_id.family, "billing");
        assert_eq!(settings.visibility_timeout, 30);
        assert!(settings.fifo.enabled);
        assert!(!settings.fifo.content_based_deduplication);
        assert_eq!(settings.redrive_policy.max_receive_count, 3);
        assert_eq!(settings.backoff.max_attempts, 3);
        assert!(settings.client_name.is_empty());
        assert!(settings.validate().is_ok());

        let invalid = SqsSinkSettings {
            visibility_timeout: 0,
            ..settings
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_redis_and_kinesis_defaults() {
        let redis: RedisSinkSettings = serde_json::from_value(json!({"key": "events"})).unwrap();
        assert_eq!(redis.server_name, "default");
        assert_eq!(redis.batch_size, 100);
        assert!(redis.validate().is_ok());

        let kinesis: KinesisSinkSettings =
            serde_json::from_value(json!({"stream_name": "events"})).unwrap();
        assert_eq!(kinesis.batch_size, MAX_KINESIS_BATCH_SIZE);
        assert!(kinesis.validate().is_ok());

        let too_big = KinesisSinkSettings {
            batch_size: 501,
            ..kinesis
        };
        assert!(too_big.validate().is_err());
    }

    #[test]
    fn test_multiple_keeps_order() {
        let settings: MultipleSinkSettings = serde_json::from_str(
            r#"{"types": {"zeta": {"type": "noop"}, "alpha": {"type": "noop"}}}"#,
        )
        .unwrap();
        let names: Vec<_> = settings.types.keys().cloned().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_default_client_name() {
        assert_eq!(default_client_name("events"), "stream-output-events");
    }
}
