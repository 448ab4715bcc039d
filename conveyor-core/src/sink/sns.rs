use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::info;

use crate::clients::TopicClient;
use crate::config::Config;
use crate::config::components::sink::{SnsSinkSettings, default_client_name, output_key};
use crate::message::{Message, WritableMessage};
use crate::sink::{Sink, SinkContext, render};
use crate::{Error, Result};

/// Publishes every message to an SNS topic, created on the first write.
pub struct SnsSink {
    client: Arc<dyn TopicClient>,
    topic_name: String,
    topic: OnceCell<String>,
}

pub(crate) fn new_from_config(
    ctx: &SinkContext,
    config: &Config,
    name: &str,
) -> Result<Arc<dyn Sink>> {
    let mut settings: SnsSinkSettings = config.unmarshal_key(&output_key(name))?;
    if settings.topic_id.is_empty() {
        return Err(Error::Config("sns topic_id must not be empty".to_string()));
    }
    settings.app_id.pad_from_config(config);
    if settings.client_name.is_empty() {
        settings.client_name = default_client_name(name);
    }

    let client = ctx.clients().topic_client(&settings.client_name)?;
    Ok(Arc::new(SnsSink::new(client, settings)))
}

impl SnsSink {
    pub fn new(client: Arc<dyn TopicClient>, settings: SnsSinkSettings) -> Self {
        Self {
            client,
            topic_name: settings.app_id.resource_name(&settings.topic_id),
            topic: OnceCell::new(),
        }
    }

    async fn topic(&self) -> Result<&str> {
        let topic = self
            .topic
            .get_or_try_init(|| async {
                let topic = self.client.create_topic(&self.topic_name).await?;
                info!(topic = %self.topic_name, "using sns topic");
                Ok::<_, Error>(topic)
            })
            .await?;
        Ok(topic.as_str())
    }

    async fn write_messages(&self, messages: Vec<Message>) -> Result<()> {
        let topic = self.topic().await?;
        for msg in messages {
            let attributes = string_attributes(&msg);
            self.client
                .publish(topic, msg.to_json()?, attributes)
                .await
                .map_err(|e| Error::Sink(format!("can not publish to {}: {e}", self.topic_name)))?;
        }
        Ok(())
    }
}

/// SNS filters on attributes, they are sent along as strings.
fn string_attributes(msg: &Message) -> HashMap<String, String> {
    msg.attributes
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

#[async_trait]
impl Sink for SnsSink {
    async fn write_one(&self, msg: &dyn WritableMessage) -> Result<()> {
        self.write_messages(vec![msg.to_message()?]).await
    }

    async fn write(&self, batch: &[Box<dyn WritableMessage>]) -> Result<()> {
        self.write_messages(render(batch)?).await
    }
}
