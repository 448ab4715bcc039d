use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::config::components::sink::{MultipleSinkSettings, output_key};
use crate::error::Errors;
use crate::message::WritableMessage;
use crate::sink::{Sink, SinkContext, build_sink};
use crate::{Error, Result};

/// Fans every write out to all of its children, one after the other. A failing child
/// never keeps the following ones from being written to, all failures are combined
/// into a single [Error::Multiple].
pub struct MultipleSink {
    sinks: Vec<(String, Arc<dyn Sink>)>,
}

/// Sub-sinks live under `stream.output.<name>.types.<sub>` and are named
/// `<name>.types.<sub>`.
pub(crate) fn new_from_config(
    ctx: &SinkContext,
    config: &Config,
    name: &str,
) -> Result<Arc<dyn Sink>> {
    let settings: MultipleSinkSettings = config.unmarshal_key(&output_key(name))?;
    if settings.types.is_empty() {
        return Err(Error::Config(format!("multiple sink {name} has no types")));
    }

    let sinks = settings
        .types
        .keys()
        .map(|sub| {
            let sub_name = format!("{name}.types.{sub}");
            build_sink(ctx, config, &sub_name).map(|sink| (sub_name, sink))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Arc::new(MultipleSink::new(sinks)))
}

impl MultipleSink {
    pub fn new(sinks: Vec<(String, Arc<dyn Sink>)>) -> Self {
        Self { sinks }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sinks.iter().map(|(name, _)| name.as_str())
    }
}

#[async_trait]
impl Sink for MultipleSink {
    async fn write_one(&self, msg: &dyn WritableMessage) -> Result<()> {
        let mut errors = Errors::new();
        for (name, sink) in &self.sinks {
            if let Err(e) = sink.write_one(msg).await {
                errors.push(Error::Sink(format!("can not write to {name}: {e}")));
            }
        }
        errors.into_result(Error::Multiple)
    }

    async fn write(&self, batch: &[Box<dyn WritableMessage>]) -> Result<()> {
        let mut errors = Errors::new();
        for (name, sink) in &self.sinks {
            if let Err(e) = sink.write(batch).await {
                errors.push(Error::Sink(format!("can not write to {name}: {e}")));
            }
        }
        errors.into_result(Error::Multiple)
    }
}
