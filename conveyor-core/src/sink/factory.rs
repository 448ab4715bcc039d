use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::config::Config;
use crate::config::components::sink::{SinkType, output_key};
use crate::sink::{InstrumentedSink, Sink, SinkContext};
use crate::sink::{file, in_memory, kinesis, multiple, noop, redis, sns, sqs};
use crate::{Error, Result};

/// Builds the sink `name` out of its configuration under `stream.output.<name>`.
pub type SinkConstructor = fn(&SinkContext, &Config, &str) -> Result<Arc<dyn Sink>>;

fn sink_factories() -> &'static HashMap<SinkType, SinkConstructor> {
    static FACTORIES: OnceLock<HashMap<SinkType, SinkConstructor>> = OnceLock::new();
    FACTORIES.get_or_init(|| {
        HashMap::from([
            (SinkType::File, file::new_from_config as SinkConstructor),
            (SinkType::InMemory, in_memory::new_from_config),
            (SinkType::Kinesis, kinesis::new_from_config),
            (SinkType::Multiple, multiple::new_from_config),
            (SinkType::Noop, noop::new_from_config),
            (SinkType::Redis, redis::new_from_config),
            (SinkType::Sns, sns::new_from_config),
            (SinkType::Sqs, sqs::new_from_config),
        ])
    })
}

/// Builds the sink configured under `stream.output.<name>`. Unknown types and
/// constructor failures are configuration errors carrying the sink name.
pub fn build_sink(ctx: &SinkContext, config: &Config, name: &str) -> Result<Arc<dyn Sink>> {
    let type_key = format!("{}.type", output_key(name));
    let raw_type = config
        .get_string(&type_key)
        .map_err(|e| Error::Config(format!("can not create sink {name}: {e}")))?;

    let constructor = raw_type
        .parse::<SinkType>()
        .ok()
        .and_then(|typ| sink_factories().get(&typ))
        .ok_or_else(|| Error::Config(format!("invalid sink {name} of type {raw_type}")))?;

    let sink = constructor(ctx, config, name)
        .map_err(|e| Error::Config(format!("can not create sink {name}: {e}")))?;

    info!(sink = name, typ = %raw_type, "created sink");
    Ok(Arc::new(InstrumentedSink::new(name, sink)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::message::{Message, WritableMessage};

    #[test]
    fn test_every_type_is_registered() {
        for typ in SinkType::ALL {
            assert!(sink_factories().contains_key(&typ), "{typ} has no constructor");
        }
    }

    #[test]
    fn test_unknown_type() {
        let config = Config::new(json!({
            "stream": {"output": {"events": {"type": "carrier_pigeon"}}}
        }))
        .unwrap();

        let err = build_sink(&SinkContext::default(), &config, "events")
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Config Error - invalid sink events of type carrier_pigeon"
        );

        let err = build_sink(&SinkContext::default(), &config, "missing")
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_constructor_error_names_the_sink() {
        let config = Config::new(json!({
            "stream": {"output": {"events": {
                "type": "multiple",
                "types": {
                    "archive": {"type": "file"}
                }
            }}}
        }))
        .unwrap();

        let err = build_sink(&SinkContext::default(), &config, "events")
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.contains("can not create sink events:"));
        assert!(message.contains("can not create sink events.types.archive:"));
    }

    #[tokio::test]
    async fn test_build_multiple() {
        let config = Config::new(json!({
            "stream": {"output": {"events": {
                "type": "multiple",
                "types": {
                    "memory": {"type": "in_memory"},
                    "void": {"type": "noop"}
                }
            }}}
        }))
        .unwrap();

        let ctx = SinkContext::default();
        let sink = build_sink(&ctx, &config, "events").unwrap();
        let batch: Vec<Box<dyn WritableMessage>> =
            vec![Box::new(Message::new("a", Default::default()))];
        sink.write(&batch).await.unwrap();

        let memory = ctx.in_memory().get("events.types.memory").unwrap();
        assert_eq!(memory.messages().len(), 1);
    }
}
