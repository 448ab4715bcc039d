use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::backoff::{BackoffSettings, Exponential};
use crate::clients::{StreamClient, StreamRecord};
use crate::config::Config;
use crate::config::components::sink::{KinesisSinkSettings, default_client_name, output_key};
use crate::message::{Message, WritableMessage};
use crate::sink::{Sink, SinkContext, render};
use crate::{Error, Result};

/// Puts messages as records onto a Kinesis stream. Every record gets a random
/// partition key, records rejected by the stream are retried with backoff.
pub struct KinesisSink {
    client: Arc<dyn StreamClient>,
    stream_name: String,
    batch_size: usize,
    backoff: BackoffSettings,
}

pub(crate) fn new_from_config(
    ctx: &SinkContext,
    config: &Config,
    name: &str,
) -> Result<Arc<dyn Sink>> {
    let mut settings: KinesisSinkSettings = config.unmarshal_key(&output_key(name))?;
    if settings.client_name.is_empty() {
        settings.client_name = default_client_name(name);
    }

    let client = ctx.clients().stream_client(&settings.client_name)?;
    Ok(Arc::new(KinesisSink::new(client, settings)?))
}

impl KinesisSink {
    pub fn new(client: Arc<dyn StreamClient>, settings: KinesisSinkSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            client,
            stream_name: settings.stream_name,
            batch_size: settings.batch_size,
            backoff: settings.backoff,
        })
    }

    async fn put_with_retry(&self, mut records: Vec<StreamRecord>) -> Result<()> {
        let mut backoff = Exponential::from(&self.backoff);

        loop {
            let failures = self
                .client
                .put_records(&self.stream_name, records.clone())
                .await?;
            if failures.is_empty() {
                return Ok(());
            }

            let failed: HashSet<&str> = failures.iter().map(|f| f.id.as_str()).collect();
            records.retain(|record| failed.contains(record.partition_key.as_str()));

            let Some(delay) = backoff.next() else {
                return Err(Error::Sink(format!(
                    "{} records could not be put to kinesis stream {}",
                    records.len(),
                    self.stream_name
                )));
            };
            warn!(
                stream = %self.stream_name,
                failed = records.len(),
                attempt = backoff.current_attempt(),
                "retrying failed kinesis records"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn write_messages(&self, messages: Vec<Message>) -> Result<()> {
        for chunk in messages.chunks(self.batch_size) {
            let records = chunk
                .iter()
                .map(|msg| -> Result<StreamRecord> {
                    Ok(StreamRecord {
                        partition_key: Uuid::new_v4().to_string(),
                        data: Bytes::from(msg.to_json()?),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            self.put_with_retry(records).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for KinesisSink {
    async fn write_one(&self, msg: &dyn WritableMessage) -> Result<()> {
        self.write_messages(vec![msg.to_message()?]).await
    }

    async fn write(&self, batch: &[Box<dyn WritableMessage>]) -> Result<()> {
        self.write_messages(render(batch)?).await
    }
}
