use serde::Deserialize;

use crate::config::Config;
use crate::{Error, Result};

pub fn input_key(name: &str) -> String {
    format!("stream.input.{name}")
}

/// Input types the built-in source factory knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    File,
}

impl SourceType {
    pub fn from_config(config: &Config, name: &str) -> Result<Self> {
        let key = format!("{}.type", input_key(name));
        match config.get_string(&key)?.as_str() {
            "file" => Ok(SourceType::File),
            other => Err(Error::Config(format!("invalid input {name} of type {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileSourceSettings {
    pub filename: String,
}
