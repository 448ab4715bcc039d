//! A [Sink] is the destination of produced messages. Every sink can be called
//! concurrently, batching and flushing is up to the backend.
//!
//! Sinks are built from the configuration by [build_sink], which selects the
//! implementation by the `type` key under `stream.output.<name>`. The `multiple` sink
//! fans out to several sub-sinks and collects their failures.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::clients::ClientRegistry;
use crate::message::{Message, WritableMessage};
use crate::metrics::{sink_metric_labels, sink_metrics};
use crate::{Error, Result};

pub mod factory;
pub mod file;
pub mod in_memory;
pub mod kinesis;
pub mod multiple;
pub mod noop;
pub mod redis;
pub mod sns;
pub mod sqs;

pub use factory::{SinkConstructor, build_sink};
pub use in_memory::{InMemorySink, InMemorySinks};
pub use multiple::MultipleSink;

#[async_trait]
pub trait Sink: Send + Sync {
    async fn write_one(&self, msg: &dyn WritableMessage) -> Result<()>;

    async fn write(&self, batch: &[Box<dyn WritableMessage>]) -> Result<()>;
}

/// Renders a batch into messages, failing on the first message which can't be rendered.
pub(crate) fn render(batch: &[Box<dyn WritableMessage>]) -> Result<Vec<Message>> {
    batch.iter().map(|msg| msg.to_message()).collect()
}

/// Everything a sink constructor may need besides the configuration.
#[derive(Clone, Default)]
pub struct SinkContext {
    clients: Arc<ClientRegistry>,
    in_memory: Arc<InMemorySinks>,
}

impl SinkContext {
    pub fn new(clients: ClientRegistry) -> Self {
        Self {
            clients: Arc::new(clients),
            in_memory: Arc::new(InMemorySinks::default()),
        }
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// The in-memory sinks created through this context, by sink name.
    pub fn in_memory(&self) -> &InMemorySinks {
        &self.in_memory
    }
}

/// Wraps every sink built by the factory to time, count and log its writes.
pub(crate) struct InstrumentedSink {
    name: String,
    labels: Vec<(String, String)>,
    inner: Arc<dyn Sink>,
}

impl InstrumentedSink {
    pub(crate) fn new(name: &str, inner: Arc<dyn Sink>) -> Self {
        Self {
            name: name.to_string(),
            labels: sink_metric_labels(name),
            inner,
        }
    }

    fn record(&self, count: usize, start: Instant, result: &Result<()>) {
        let metrics = sink_metrics();
        metrics
            .write_time
            .get_or_create(&self.labels)
            .observe(start.elapsed().as_micros() as f64);

        match result {
            Ok(()) => {
                metrics
                    .write_total
                    .get_or_create(&self.labels)
                    .inc_by(count as u64);
                debug!(sink = %self.name, count, "wrote messages");
            }
            Err(e) => {
                metrics.write_errors_total.get_or_create(&self.labels).inc();
                error!(sink = %self.name, count, ?e, "failed to write messages");
            }
        }
    }
}

#[async_trait]
impl Sink for InstrumentedSink {
    async fn write_one(&self, msg: &dyn WritableMessage) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.write_one(msg).await;
        self.record(1, start, &result);
        result
    }

    async fn write(&self, batch: &[Box<dyn WritableMessage>]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let result = self.inner.write(batch).await;
        self.record(batch.len(), start, &result);
        result
    }
}
