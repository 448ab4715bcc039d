use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::ListClient;
use crate::config::Config;
use crate::config::components::sink::{RedisSinkSettings, output_key};
use crate::message::{Message, WritableMessage};
use crate::sink::{Sink, SinkContext, render};
use crate::{Error, Result};

/// Pushes messages onto a redis list, `batch_size` values per command.
pub struct RedisSink {
    client: Arc<dyn ListClient>,
    key: String,
    batch_size: usize,
}

pub(crate) fn new_from_config(
    ctx: &SinkContext,
    config: &Config,
    name: &str,
) -> Result<Arc<dyn Sink>> {
    let mut settings: RedisSinkSettings = config.unmarshal_key(&output_key(name))?;
    settings.app_id.pad_from_config(config);

    let client = ctx.clients().list_client(&settings.server_name)?;
    Ok(Arc::new(RedisSink::new(client, settings)?))
}

impl RedisSink {
    pub fn new(client: Arc<dyn ListClient>, settings: RedisSinkSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            client,
            key: settings.app_id.resource_name(&settings.key),
            batch_size: settings.batch_size,
        })
    }

    async fn write_messages(&self, messages: Vec<Message>) -> Result<()> {
        for chunk in messages.chunks(self.batch_size) {
            let values = chunk
                .iter()
                .map(Message::to_json)
                .collect::<Result<Vec<_>>>()?;
            self.client
                .rpush(&self.key, values)
                .await
                .map_err(|e| Error::Sink(format!("can not push to list {}: {e}", self.key)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for RedisSink {
    async fn write_one(&self, msg: &dyn WritableMessage) -> Result<()> {
        self.write_messages(vec![msg.to_message()?]).await
    }

    async fn write(&self, batch: &[Box<dyn WritableMessage>]) -> Result<()> {
        self.write_messages(render(batch)?).await
    }
}
