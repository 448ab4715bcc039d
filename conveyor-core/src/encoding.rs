use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ATTRIBUTE_ENCODING, Attributes, Message};
use crate::{Error, Result};

const ENCODING_JSON: &str = "application/json";
const ENCODING_TEXT: &str = "text/plain";
const ENCODING_AGGREGATE: &str = "application/vnd.conveyor.aggregate+json";

/// Attribute keys only the pipeline itself reads. They are removed before attributes
/// are handed to a callback.
const INTERNAL_ATTRIBUTES: &[&str] = &[ATTRIBUTE_ENCODING];

/// Encoding of a message body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "application/json")]
    Json,
    #[serde(rename = "text/plain")]
    Text,
    /// Reserved for aggregate envelopes, never used for a model.
    #[serde(rename = "application/vnd.conveyor.aggregate+json")]
    Aggregate,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => ENCODING_JSON,
            Encoding::Text => ENCODING_TEXT,
            Encoding::Aggregate => ENCODING_AGGREGATE,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ENCODING_JSON => Ok(Encoding::Json),
            ENCODING_TEXT => Ok(Encoding::Text),
            ENCODING_AGGREGATE => Ok(Encoding::Aggregate),
            other => Err(Error::Decode(format!("unknown encoding {other}"))),
        }
    }
}

/// MessageEncoder turns models into [Message]s and back. The encoding it is created
/// with is used for encoding and as a fallback for messages without an encoding tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageEncoder {
    encoding: Encoding,
}

impl MessageEncoder {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn encode<T>(&self, body: &T, mut attributes: Attributes) -> Result<Message>
    where
        T: Serialize + ?Sized,
    {
        let body = match self.encoding {
            Encoding::Json => serde_json::to_string(body)
                .map_err(|e| Error::Encode(format!("can not encode body as json: {e}")))?,
            Encoding::Text => match serde_json::to_value(body) {
                Ok(Value::String(text)) => text,
                Ok(other) => {
                    return Err(Error::Encode(format!(
                        "text encoding needs a string body, got {other}"
                    )));
                }
                Err(e) => return Err(Error::Encode(format!("can not encode body: {e}"))),
            },
            Encoding::Aggregate => {
                return Err(Error::Encode(
                    "aggregate encoding is reserved for aggregate messages".to_string(),
                ));
            }
        };

        attributes.insert(
            ATTRIBUTE_ENCODING.to_string(),
            Value::from(self.encoding.as_str()),
        );

        Ok(Message { attributes, body })
    }

    /// Decodes the body of the message according to its own encoding tag and returns
    /// it along with the attributes, stripped of internal keys.
    pub fn decode<T>(&self, msg: &Message) -> Result<(T, Attributes)>
    where
        T: DeserializeOwned,
    {
        let encoding = match msg.encoding() {
            Some(raw) => raw.parse()?,
            None => self.encoding,
        };

        let body = match encoding {
            Encoding::Json => serde_json::from_str(&msg.body)
                .map_err(|e| Error::Decode(format!("can not decode json body: {e}")))?,
            Encoding::Text => serde_json::from_value(Value::String(msg.body.clone()))
                .map_err(|e| Error::Decode(format!("can not decode text body: {e}")))?,
            Encoding::Aggregate => {
                return Err(Error::Decode(
                    "aggregate messages have to be expanded before decoding".to_string(),
                ));
            }
        };

        let attributes = msg
            .attributes
            .iter()
            .filter(|(key, _)| !INTERNAL_ATTRIBUTES.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok((body, attributes))
    }
}
