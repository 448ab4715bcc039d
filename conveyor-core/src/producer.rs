use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::Result;
use crate::config::Config;
use crate::config::components::producer::ProducerSettings;
use crate::encoding::MessageEncoder;
use crate::message::{Attributes, Message, WritableMessage};
use crate::sink::{Sink, SinkContext, build_sink};

/// Producer encodes models and writes them to its output sink. With an
/// `aggregation_size` above 1 batch writes are packed into aggregate messages of up to
/// that many messages each.
pub struct Producer {
    name: String,
    settings: ProducerSettings,
    encoder: MessageEncoder,
    sink: Arc<dyn Sink>,
}

impl Producer {
    pub fn new(name: &str, settings: ProducerSettings, sink: Arc<dyn Sink>) -> Self {
        Self {
            name: name.to_string(),
            encoder: MessageEncoder::new(settings.encoding),
            settings,
            sink,
        }
    }

    /// Reads `stream.producer.<name>` and builds the sink named by its `output`.
    pub fn from_config(ctx: &SinkContext, config: &Config, name: &str) -> Result<Self> {
        let settings = ProducerSettings::from_config(config, name)?;
        let sink = build_sink(ctx, config, &settings.output)?;
        Ok(Self::new(name, settings, sink))
    }

    pub fn settings(&self) -> &ProducerSettings {
        &self.settings
    }

    /// Writes a single model. Single writes are never aggregated.
    pub async fn write_one<T>(&self, model: &T, attributes: Attributes) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let msg = self.encoder.encode(model, attributes)?;
        self.sink.write_one(&msg).await
    }

    /// Writes the models as one batch, without attributes.
    pub async fn write<T: Serialize>(&self, models: &[T]) -> Result<()> {
        let messages = models
            .iter()
            .map(|model| self.encoder.encode(model, Attributes::new()))
            .collect::<Result<Vec<_>>>()?;
        self.write_messages(messages).await
    }

    /// Writes already encoded messages as one batch.
    pub async fn write_messages(&self, messages: Vec<Message>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let messages = if self.settings.aggregation_size > 1 {
            messages
                .chunks(self.settings.aggregation_size)
                .map(Message::aggregate)
                .collect::<Result<Vec<_>>>()?
        } else {
            messages
        };

        debug!(producer = %self.name, count = messages.len(), "writing messages");
        let batch: Vec<Box<dyn WritableMessage>> = messages
            .into_iter()
            .map(|msg| Box::new(msg) as Box<dyn WritableMessage>)
            .collect();
        self.sink.write(&batch).await
    }
}
