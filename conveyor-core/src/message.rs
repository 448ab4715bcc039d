use std::collections::HashMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encoding::Encoding;
use crate::{Error, Result};

/// Attribute key carrying the [Encoding] of the body.
pub const ATTRIBUTE_ENCODING: &str = "encoding";

/// Attributes travel next to the body, values are arbitrary scalars.
pub type Attributes = HashMap<String, Value>;

/// Message is the envelope moving through the pipeline. Its JSON form is what the
/// backends transmit, `{"attributes":{...},"body":"..."}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub attributes: Attributes,
    pub body: String,
}

impl Message {
    pub fn new(body: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            attributes,
            body: body.into(),
        }
    }

    /// Returns the encoding tag of the message, if any.
    pub fn encoding(&self) -> Option<&str> {
        self.attributes
            .get(ATTRIBUTE_ENCODING)
            .and_then(Value::as_str)
    }

    pub fn is_aggregate(&self) -> bool {
        self.encoding() == Some(Encoding::Aggregate.as_str())
    }

    /// Packs the given messages into a single aggregate envelope. The order of the
    /// messages is kept in the body.
    pub fn aggregate(messages: &[Message]) -> Result<Message> {
        if messages.is_empty() {
            return Err(Error::Encode(
                "can not build an aggregate out of zero messages".to_string(),
            ));
        }
        if messages.iter().any(Message::is_aggregate) {
            return Err(Error::Encode(
                "aggregates can not be nested".to_string(),
            ));
        }

        let body = serde_json::to_string(messages)
            .map_err(|e| Error::Encode(format!("can not marshal aggregate: {e}")))?;
        let attributes = HashMap::from([(
            ATTRIBUTE_ENCODING.to_string(),
            Value::from(Encoding::Aggregate.as_str()),
        )]);

        Ok(Message { attributes, body })
    }

    /// Expands an aggregate envelope into the messages it carries, in order.
    pub fn expand_aggregate(&self) -> Result<Vec<Message>> {
        if !self.is_aggregate() {
            return Err(Error::Decode(format!(
                "message with encoding {:?} is not an aggregate",
                self.encoding()
            )));
        }

        let messages: Vec<Message> = serde_json::from_str(&self.body)
            .map_err(|e| Error::Decode(format!("can not unmarshal aggregate: {e}")))?;

        if messages.is_empty() {
            return Err(Error::Decode("aggregate contains no messages".to_string()));
        }
        if messages.iter().any(Message::is_aggregate) {
            return Err(Error::Decode(
                "aggregate contains a nested aggregate".to_string(),
            ));
        }

        Ok(messages)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Encode(format!("can not marshal message: {e}")))
    }

    pub fn from_json(raw: &str) -> Result<Message> {
        serde_json::from_str(raw)
            .map_err(|e| Error::Decode(format!("can not unmarshal message: {e}")))
    }
}

/// Anything that can render itself into a [Message] ready for a sink.
pub trait WritableMessage: Debug + Send + Sync {
    fn to_message(&self) -> Result<Message>;
}

impl WritableMessage for Message {
    fn to_message(&self) -> Result<Message> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_message(body: &str) -> Message {
        Message::new(
            body,
            HashMap::from([
                (ATTRIBUTE_ENCODING.to_string(), Value::from("application/json")),
                ("bla".to_string(), Value::from("blub")),
            ]),
        )
    }

    #[test]
    fn test_message_json_shape() {
        let msg = json_message(r#""foo""#);
        let raw = msg.to_json().unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["body"], Value::from(r#""foo""#));
        assert_eq!(parsed["attributes"]["bla"], Value::from("blub"));

        assert_eq!(Message::from_json(&raw).unwrap(), msg);
    }

    #[test]
    fn test_message_without_attributes() {
        let msg = Message::from_json(r#"{"body":"plain"}"#).unwrap();
        assert!(msg.attributes.is_empty());
        assert_eq!(msg.encoding(), None);
        assert!(!msg.is_aggregate());
    }

    #[test]
    fn test_aggregate_keeps_order() {
        let aggregate =
            Message::aggregate(&[json_message(r#""foo""#), json_message(r#""bar""#)]).unwrap();
        assert!(aggregate.is_aggregate());

        let expanded = aggregate.expand_aggregate().unwrap();
        let bodies: Vec<_> = expanded.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec![r#""foo""#, r#""bar""#]);
        assert!(expanded.iter().all(|m| !m.is_aggregate()));
    }

    #[test]
    fn test_aggregate_rejects_empty_and_nested() {
        assert!(matches!(Message::aggregate(&[]), Err(Error::Encode(_))));

        let inner = Message::aggregate(&[json_message("1")]).unwrap();
        assert!(matches!(Message::aggregate(&[inner]), Err(Error::Encode(_))));
    }

    #[test]
    fn test_expand_malformed_aggregate() {
        let mut msg = Message::aggregate(&[json_message("1")]).unwrap();

        msg.body = "not json".to_string();
        assert!(matches!(msg.expand_aggregate(), Err(Error::Decode(_))));

        msg.body = "[]".to_string();
        assert!(matches!(msg.expand_aggregate(), Err(Error::Decode(_))));

        let nested = Message::aggregate(&[json_message("1")]).unwrap();
        msg.body = serde_json::to_string(&vec![nested]).unwrap();
        assert!(matches!(msg.expand_aggregate(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_expand_plain_message() {
        let err = json_message("1").expand_aggregate().unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
