//! Writes messages to an SQS queue. The queue is created on the first write, messages
//! are sent in batches of at most ten and entries failing without the sender being at
//! fault are retried with an exponential backoff.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::backoff::{BackoffSettings, Exponential};
use crate::clients::{QueueClient, QueueEntry, QueueProperties};
use crate::config::Config;
use crate::config::components::sink::{SqsSinkSettings, default_client_name, output_key};
use crate::message::{Message, WritableMessage};
use crate::sink::{Sink, SinkContext, render};
use crate::{Error, Result};

const SQS_MAX_BATCH_SIZE: usize = 10;
const FIFO_SUFFIX: &str = ".fifo";

pub const ATTRIBUTE_SQS_DELAY_SECONDS: &str = "sqs_delay_seconds";
pub const ATTRIBUTE_SQS_MESSAGE_GROUP_ID: &str = "sqs_message_group_id";
pub const ATTRIBUTE_SQS_MESSAGE_DEDUPLICATION_ID: &str = "sqs_message_deduplication_id";

pub struct SqsSink {
    client: Arc<dyn QueueClient>,
    properties: QueueProperties,
    backoff: BackoffSettings,
    queue_url: OnceCell<String>,
}

pub(crate) fn new_from_config(
    ctx: &SinkContext,
    config: &Config,
    name: &str,
) -> Result<Arc<dyn Sink>> {
    let mut settings: SqsSinkSettings = config.unmarshal_key(&output_key(name))?;
    settings.validate()?;
    settings.app_id.pad_from_config(config);
    if settings.client_name.is_empty() {
        settings.client_name = default_client_name(name);
    }

    let client = ctx.clients().queue_client(&settings.client_name)?;
    Ok(Arc::new(SqsSink::new(client, settings)))
}

impl SqsSink {
    pub fn new(client: Arc<dyn QueueClient>, settings: SqsSinkSettings) -> Self {
        let mut queue_name = settings.app_id.resource_name(&settings.queue_id);
        if settings.fifo.enabled {
            queue_name.push_str(FIFO_SUFFIX);
        }

        Self {
            client,
            properties: QueueProperties {
                name: queue_name,
                visibility_timeout: settings.visibility_timeout,
                redrive_policy: settings.redrive_policy,
                fifo: settings.fifo,
            },
            backoff: settings.backoff,
            queue_url: OnceCell::new(),
        }
    }

    async fn queue_url(&self) -> Result<&str> {
        let url = self
            .queue_url
            .get_or_try_init(|| async {
                let url = self.client.create_queue(&self.properties).await?;
                info!(queue = %self.properties.name, %url, "using sqs queue");
                Ok::<_, Error>(url)
            })
            .await?;
        Ok(url.as_str())
    }

    /// Moves the sqs specific attributes of the message into the request entry.
    fn build_entry(&self, id: usize, mut msg: Message) -> Result<QueueEntry> {
        let delay_seconds = match msg.attributes.remove(ATTRIBUTE_SQS_DELAY_SECONDS) {
            None => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .and_then(|delay| u32::try_from(delay).ok())
                    .ok_or_else(|| {
                        Error::Sink(format!("{ATTRIBUTE_SQS_DELAY_SECONDS} is invalid: {value}"))
                    })?,
            ),
        };
        let message_group_id = take_string(&mut msg, ATTRIBUTE_SQS_MESSAGE_GROUP_ID)?;
        let message_deduplication_id =
            take_string(&mut msg, ATTRIBUTE_SQS_MESSAGE_DEDUPLICATION_ID)?;

        if self.properties.fifo.enabled && message_group_id.is_none() {
            return Err(Error::Sink(format!(
                "messages for the fifo queue {} need the {ATTRIBUTE_SQS_MESSAGE_GROUP_ID} attribute",
                self.properties.name
            )));
        }

        Ok(QueueEntry {
            id: id.to_string(),
            body: msg.to_json()?,
            delay_seconds,
            message_group_id,
            message_deduplication_id,
        })
    }

    async fn send_with_retry(&self, queue_url: &str, mut entries: Vec<QueueEntry>) -> Result<()> {
        let mut backoff = Exponential::from(&self.backoff);

        loop {
            let failures = self
                .client
                .send_message_batch(queue_url, entries.clone())
                .await?;
            if failures.is_empty() {
                return Ok(());
            }

            if let Some(failure) = failures.iter().find(|f| f.sender_fault) {
                return Err(Error::Sink(format!(
                    "sqs rejected message {} of queue {}: {} {}",
                    failure.id, self.properties.name, failure.code, failure.message
                )));
            }

            let failed: HashSet<&str> = failures.iter().map(|f| f.id.as_str()).collect();
            entries.retain(|entry| failed.contains(entry.id.as_str()));

            match backoff.next() {
                Some(delay) => {
                    warn!(
                        queue = %self.properties.name,
                        failed = entries.len(),
                        attempt = backoff.current_attempt(),
                        "retrying failed sqs entries"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(Error::Sink(format!(
                        "{} messages could not be sent to sqs queue {} after {} attempts",
                        entries.len(),
                        self.properties.name,
                        backoff.current_attempt() + 1
                    )));
                }
            }
        }
    }

    async fn write_messages(&self, messages: Vec<Message>) -> Result<()> {
        let queue_url = self.queue_url().await?;

        for chunk in messages.chunks(SQS_MAX_BATCH_SIZE) {
            let entries = chunk
                .iter()
                .cloned()
                .enumerate()
                .map(|(id, msg)| self.build_entry(id, msg))
                .collect::<Result<Vec<_>>>()?;
            self.send_with_retry(queue_url, entries).await?;
        }
        Ok(())
    }
}

fn take_string(msg: &mut Message, key: &str) -> Result<Option<String>> {
    match msg.attributes.remove(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(Error::Sink(format!("{key} has to be a string, got {other}"))),
    }
}

#[async_trait]
impl Sink for SqsSink {
    async fn write_one(&self, msg: &dyn WritableMessage) -> Result<()> {
        self.write_messages(vec![msg.to_message()?]).await
    }

    async fn write(&self, batch: &[Box<dyn WritableMessage>]) -> Result<()> {
        self.write_messages(render(batch)?).await
    }
}
