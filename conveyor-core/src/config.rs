use std::env;
use std::path::Path;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::Error;
use crate::Result;

/// Env variable holding the base64 encoded JSON configuration.
pub const ENV_CONFIG_OBJECT: &str = "CONVEYOR_CONFIG_OBJECT";

const KEY_APP_PROJECT: &str = "app_project";
const KEY_APP_ENVIRONMENT: &str = "env";
const KEY_APP_FAMILY: &str = "app_family";
const KEY_APP_NAME: &str = "app_name";

pub mod components;

/// Config is the full system configuration. Values are addressed with dotted keys,
/// e.g. `stream.output.events.type`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    root: Value,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl Config {
    pub fn new(root: Value) -> Result<Self> {
        if !root.is_object() {
            return Err(Error::Config(
                "the configuration root has to be an object".to_string(),
            ));
        }
        Ok(Self { root })
    }

    /// Loads the configuration from [ENV_CONFIG_OBJECT].
    pub fn from_env() -> Result<Self> {
        let obj = env::var(ENV_CONFIG_OBJECT)
            .map_err(|_| Error::Config(format!("{ENV_CONFIG_OBJECT} is not set")))?;
        Self::from_base64(&obj)
    }

    pub fn from_base64(obj: &str) -> Result<Self> {
        let decoded = BASE64_STANDARD
            .decode(obj.trim().as_bytes())
            .map_err(|e| Error::Config(format!("failed to decode config object: {e}")))?;
        let root: Value = serde_json::from_slice(&decoded)
            .map_err(|e| Error::Config(format!("failed to parse config object: {e}")))?;
        Self::new(root)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let root: Value = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        Self::new(root)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(&self.root, |value, part| value.get(part))
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(Error::Config(format!(
                "value of {key} is not a string: {other}"
            ))),
            None => Err(Error::Config(format!("{key} is not set"))),
        }
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    /// Deserializes the subtree at `key`. A missing key deserializes from an empty
    /// object, so the defaults of `T` apply.
    pub fn unmarshal_key<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = match self.get(key) {
            Some(value) => value.clone(),
            None => Value::Object(Map::new()),
        };
        serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("can not unmarshal {key}: {e}")))
    }
}

/// Identity of the running application, used to derive backend resource names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppId {
    pub project: String,
    pub environment: String,
    pub family: String,
    pub application: String,
}

impl AppId {
    pub fn from_config(config: &Config) -> Self {
        let mut app_id = AppId::default();
        app_id.pad_from_config(config);
        app_id
    }

    /// Fills the empty fields from the global application keys.
    pub fn pad_from_config(&mut self, config: &Config) {
        let pad = |field: &mut String, key: &str| {
            if field.is_empty() {
                *field = config.get_string_or(key, "");
            }
        };
        pad(&mut self.project, KEY_APP_PROJECT);
        pad(&mut self.environment, KEY_APP_ENVIRONMENT);
        pad(&mut self.family, KEY_APP_FAMILY);
        pad(&mut self.application, KEY_APP_NAME);
    }

    /// Builds a resource name out of the identity and the given id, e.g.
    /// `shop-prod-orders-api-events`.
    pub fn resource_name(&self, id: &str) -> String {
        [
            self.project.as_str(),
            self.environment.as_str(),
            self.family.as_str(),
            self.application.as_str(),
            id,
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-")
    }
}

/// Serde helpers for durations given either as integer seconds or as strings with a
/// unit suffix (`500ms`, `10s`, `1m`, `1h`).
pub mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    use crate::{Error, Result};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        }
    }

    pub fn parse(raw: &str) -> Result<Duration> {
        let raw = raw.trim();
        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(raw.len());
        let (value, unit) = raw.split_at(split);
        let value: u64 = value
            .parse()
            .map_err(|_| Error::Config(format!("invalid duration {raw:?}")))?;

        let secs = |factor: u64| {
            value
                .checked_mul(factor)
                .map(Duration::from_secs)
                .ok_or_else(|| Error::Config(format!("invalid duration {raw:?}, out of range")))
        };

        match unit {
            "" | "s" => Ok(Duration::from_secs(value)),
            "ms" => Ok(Duration::from_millis(value)),
            "m" => secs(60),
            "h" => secs(60 * 60),
            other => Err(Error::Config(format!(
                "invalid duration unit {other:?} in {raw:?}"
            ))),
        }
    }
}
