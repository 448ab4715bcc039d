use std::iter;
use std::sync::OnceLock;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::{Error, Result};

// The top-level metric registry is created with the GLOBAL_PREFIX
const REGISTRY_GLOBAL_PREFIX: &str = "conveyor";
// Prefixes for the sub-registries
const CONSUMER_REGISTRY_PREFIX: &str = "consumer";
const SINK_REGISTRY_PREFIX: &str = "sink";

const CONSUMER_NAME_LABEL: &str = "consumer";
const SINK_NAME_LABEL: &str = "sink";

// counters, the _total suffix is added by the client library
const READ_TOTAL: &str = "read";
const PROCESSED_TOTAL: &str = "processed";
const DECODE_ERRORS_TOTAL: &str = "decode_errors";
const CALLBACK_ERRORS_TOTAL: &str = "callback_errors";
const CALLBACK_PANICS_TOTAL: &str = "callback_panics";
const ACK_TOTAL: &str = "ack";
const ACK_ERRORS_TOTAL: &str = "ack_errors";
const WRITE_TOTAL: &str = "write";
const WRITE_ERRORS_TOTAL: &str = "write_errors";

// timers
const PROCESS_TIME: &str = "process_time";
const WRITE_TIME: &str = "write_time";

/// The global register of all metrics.
struct GlobalRegistry {
    // std like mutex is fine, each metric is registered only once
    registry: parking_lot::Mutex<Registry>,
}

impl GlobalRegistry {
    fn new() -> Self {
        GlobalRegistry {
            registry: parking_lot::Mutex::new(Registry::with_prefix(REGISTRY_GLOBAL_PREFIX)),
        }
    }
}

static GLOBAL_REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();

fn global_registry() -> &'static GlobalRegistry {
    GLOBAL_REGISTRY.get_or_init(GlobalRegistry::new)
}

/// Exponential bucket distribution with range. Creates `length` buckets between
/// `min` and `max`, the final +Inf bucket is not included.
fn exponential_buckets_range(min: f64, max: f64, length: u16) -> impl Iterator<Item = f64> {
    let length = length.max(2);
    let min = if min > 0.0 { min } else { 1.0 };
    let growth_factor = (max / min).powf(1.0 / (f64::from(length) - 1.0));

    iter::repeat(())
        .enumerate()
        .map(move |(i, _)| min * growth_factor.powf(i as f64))
        .take(length.into())
}

// timers are in microseconds, 100 microseconds to 15 minutes
fn time_histogram() -> Histogram {
    Histogram::new(exponential_buckets_range(100.0, 60000000.0 * 15.0, 10))
}

pub(crate) struct ConsumerMetrics {
    pub(crate) read_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) processed_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) decode_errors_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) callback_errors_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) callback_panics_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) ack_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) ack_errors_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) process_time: Family<Vec<(String, String)>, Histogram>,
}

impl ConsumerMetrics {
    fn new() -> Self {
        let metrics = Self {
            read_total: Family::<Vec<(String, String)>, Counter>::default(),
            processed_total: Family::<Vec<(String, String)>, Counter>::default(),
            decode_errors_total: Family::<Vec<(String, String)>, Counter>::default(),
            callback_errors_total: Family::<Vec<(String, String)>, Counter>::default(),
            callback_panics_total: Family::<Vec<(String, String)>, Counter>::default(),
            ack_total: Family::<Vec<(String, String)>, Counter>::default(),
            ack_errors_total: Family::<Vec<(String, String)>, Counter>::default(),
            process_time: Family::<Vec<(String, String)>, Histogram>::new_with_constructor(
                time_histogram,
            ),
        };

        let mut registry = global_registry().registry.lock();
        let registry = registry.sub_registry_with_prefix(CONSUMER_REGISTRY_PREFIX);
        registry.register(
            READ_TOTAL,
            "Total number of messages read from the source",
            metrics.read_total.clone(),
        );
        registry.register(
            PROCESSED_TOTAL,
            "Total number of messages successfully handed to the callback",
            metrics.processed_total.clone(),
        );
        registry.register(
            DECODE_ERRORS_TOTAL,
            "Total number of messages dropped because they could not be decoded",
            metrics.decode_errors_total.clone(),
        );
        registry.register(
            CALLBACK_ERRORS_TOTAL,
            "Total number of messages the callback failed to consume",
            metrics.callback_errors_total.clone(),
        );
        registry.register(
            CALLBACK_PANICS_TOTAL,
            "Total number of recovered callback panics",
            metrics.callback_panics_total.clone(),
        );
        registry.register(
            ACK_TOTAL,
            "Total number of messages acknowledged at the source",
            metrics.ack_total.clone(),
        );
        registry.register(
            ACK_ERRORS_TOTAL,
            "Total number of failed acknowledgements",
            metrics.ack_errors_total.clone(),
        );
        registry.register(
            PROCESS_TIME,
            "Time taken to decode and consume a message in microseconds",
            metrics.process_time.clone(),
        );
        metrics
    }
}

pub(crate) struct SinkMetrics {
    pub(crate) write_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) write_errors_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) write_time: Family<Vec<(String, String)>, Histogram>,
}

impl SinkMetrics {
    fn new() -> Self {
        let metrics = Self {
            write_total: Family::<Vec<(String, String)>, Counter>::default(),
            write_errors_total: Family::<Vec<(String, String)>, Counter>::default(),
            write_time: Family::<Vec<(String, String)>, Histogram>::new_with_constructor(
                time_histogram,
            ),
        };

        let mut registry = global_registry().registry.lock();
        let registry = registry.sub_registry_with_prefix(SINK_REGISTRY_PREFIX);
        registry.register(
            WRITE_TOTAL,
            "Total number of messages written to the sink",
            metrics.write_total.clone(),
        );
        registry.register(
            WRITE_ERRORS_TOTAL,
            "Total number of failed sink writes",
            metrics.write_errors_total.clone(),
        );
        registry.register(
            WRITE_TIME,
            "Time taken to write to the sink in microseconds",
            metrics.write_time.clone(),
        );
        metrics
    }
}

static CONSUMER_METRICS: OnceLock<ConsumerMetrics> = OnceLock::new();

pub(crate) fn consumer_metrics() -> &'static ConsumerMetrics {
    CONSUMER_METRICS.get_or_init(ConsumerMetrics::new)
}

static SINK_METRICS: OnceLock<SinkMetrics> = OnceLock::new();

pub(crate) fn sink_metrics() -> &'static SinkMetrics {
    SINK_METRICS.get_or_init(SinkMetrics::new)
}

pub(crate) fn consumer_metric_labels(consumer: &str) -> Vec<(String, String)> {
    vec![(CONSUMER_NAME_LABEL.to_string(), consumer.to_string())]
}

pub(crate) fn sink_metric_labels(sink: &str) -> Vec<(String, String)> {
    vec![(SINK_NAME_LABEL.to_string(), sink.to_string())]
}

/// Snapshot of all registered metrics in the OpenMetrics text format.
pub fn metrics_text() -> Result<String> {
    // make sure every family shows up, even before its first use
    consumer_metrics();
    sink_metrics();

    let registry = global_registry().registry.lock();
    let mut buffer = String::new();
    encode(&mut buffer, &registry).map_err(|e| Error::Config(format!("encoding metrics: {e}")))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets() {
        let buckets: Vec<f64> = exponential_buckets_range(100.0, 10000.0, 3).collect();
        assert_eq!(buckets.len(), 3);
        assert!((buckets[0] - 100.0).abs() < 1e-6);
        assert!((buckets[1] - 1000.0).abs() < 1e-6);
        assert!((buckets[2] - 10000.0).abs() < 1e-3);
    }

    #[test]
    fn test_metrics_text() {
        let labels = sink_metric_labels("metrics-test-sink");
        sink_metrics().write_total.get_or_create(&labels).inc_by(3);

        let text = metrics_text().unwrap();
        assert!(text.contains("conveyor_sink_write_total"));
        assert!(text.contains(r#"sink="metrics-test-sink""#));
        assert!(text.contains("conveyor_consumer_read"));
    }
}
