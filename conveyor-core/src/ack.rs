use std::sync::Arc;

use tracing::{debug, error};

use crate::message::Message;
use crate::metrics::{consumer_metric_labels, consumer_metrics};
use crate::source::Source;

/// Acknowledger tells the source which messages were handled. Acknowledging is best
/// effort, failures are logged and counted but never fail the consumer. Sources which
/// can't acknowledge are skipped silently.
pub(crate) struct Acknowledger {
    consumer: String,
    labels: Vec<(String, String)>,
    source: Arc<dyn Source>,
}

impl Acknowledger {
    pub(crate) fn new(consumer: &str, source: Arc<dyn Source>) -> Self {
        Self {
            consumer: consumer.to_string(),
            labels: consumer_metric_labels(consumer),
            source,
        }
    }

    pub(crate) async fn acknowledge(&self, msg: &Message) {
        let Some(acker) = self.source.as_acknowledgeable() else {
            return;
        };

        match acker.ack(msg).await {
            Ok(()) => self.record(1),
            Err(e) => self.record_failure(1, e),
        }
    }

    pub(crate) async fn acknowledge_batch(&self, msgs: &[Message]) {
        let Some(acker) = self.source.as_acknowledgeable() else {
            return;
        };

        match acker.ack_batch(msgs).await {
            Ok(()) => self.record(msgs.len()),
            Err(e) => self.record_failure(msgs.len(), e),
        }
    }

    /// Acknowledges one message with `ack` and more than one with `ack_batch`.
    pub(crate) async fn acknowledge_all(&self, msgs: &[Message]) {
        match msgs {
            [] => {}
            [msg] => self.acknowledge(msg).await,
            msgs => self.acknowledge_batch(msgs).await,
        }
    }

    fn record(&self, count: usize) {
        consumer_metrics()
            .ack_total
            .get_or_create(&self.labels)
            .inc_by(count as u64);
        debug!(consumer = %self.consumer, count, "acknowledged messages");
    }

    fn record_failure(&self, count: usize, e: crate::Error) {
        consumer_metrics()
            .ack_errors_total
            .get_or_create(&self.labels)
            .inc();
        error!(consumer = %self.consumer, count, ?e, "could not acknowledge messages");
    }
}
