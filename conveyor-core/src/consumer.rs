//! The [Consumer] pulls messages from a [Source], decodes them and hands them to a
//! [ConsumerCallback] using a fixed number of runners.
//!
//! A run goes through the states `Idle -> Running -> Draining -> Stopped`:
//!   - the source and the callback are run in their own tasks, next to `runner_count`
//!     runners reading from the source stream.
//!   - cancelling the caller's token, a failing callback `run` or the source `run`
//!     returning starts the drain: the source is stopped once and closes its stream,
//!     the runners hand out what is still buffered and return once the stream ended.
//!     Once the source completed, the idle timeout finalizes a runner even if the
//!     stream is never closed.
//!   - after all runners returned, the run token is cancelled and the source and
//!     callback tasks are awaited. Their failures are returned together, wrapped in
//!     [Error::Shutdown].
//!
//! Every message is processed behind a panic barrier, a bad message is logged, counted
//! and skipped, it never takes a runner down.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::ack::Acknowledger;
use crate::config::Config;
use crate::config::components::consumer::ConsumerSettings;
use crate::encoding::MessageEncoder;
use crate::error::{Errors, panic_message};
use crate::message::{Attributes, Message};
use crate::metrics::{consumer_metric_labels, consumer_metrics};
use crate::source::{MessageStream, Source};
use crate::{Error, Result};

/// The user side of a consumer.
#[async_trait]
pub trait ConsumerCallback: Send + Sync + 'static {
    /// The type message bodies are decoded into.
    type Model: DeserializeOwned + Send;

    /// Lifecycle hook running next to the consumer, usually waiting for the token to
    /// be cancelled. An error fails the consumer run.
    async fn run(&self, cln_token: CancellationToken) -> Result<()>;

    /// Whether the message with the given (raw) attributes can be decoded into a
    /// [Self::Model]. Rejected messages are logged and not acknowledged.
    fn accepts(&self, _attributes: &Attributes) -> bool {
        true
    }

    /// Consumes a single decoded message. Returning `Ok(true)` acknowledges it.
    async fn consume(
        &self,
        cln_token: &CancellationToken,
        model: Self::Model,
        attributes: Attributes,
    ) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

pub struct Consumer<C: ConsumerCallback> {
    name: String,
    settings: ConsumerSettings,
    source: Arc<dyn Source>,
    callback: Arc<C>,
    encoder: MessageEncoder,
    state: Arc<watch::Sender<ConsumerState>>,
}

impl<C: ConsumerCallback> Consumer<C> {
    pub fn new(
        name: &str,
        settings: ConsumerSettings,
        source: Arc<dyn Source>,
        callback: C,
    ) -> Result<Self> {
        settings.validate()?;
        let (state, _) = watch::channel(ConsumerState::Idle);

        Ok(Self {
            name: name.to_string(),
            encoder: MessageEncoder::new(settings.encoding),
            settings,
            source,
            callback: Arc::new(callback),
            state: Arc::new(state),
        })
    }

    /// Reads the settings from `stream.consumer.<name>`.
    pub fn from_config(
        config: &Config,
        name: &str,
        source: Arc<dyn Source>,
        callback: C,
    ) -> Result<Self> {
        let settings = ConsumerSettings::from_config(config, name)?;
        Self::new(name, settings, source, callback)
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn callback(&self) -> &C {
        &self.callback
    }

    /// Runs the consumer until the source is exhausted, the token is cancelled or the
    /// source or callback failed. A consumer can be run only once.
    pub async fn run(&self, cln_token: CancellationToken) -> Result<()> {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == ConsumerState::Idle {
                *state = ConsumerState::Running;
                started = true;
            }
            started
        });
        if !started {
            return Err(Error::Consumer(format!(
                "consumer {} can not be run in state {:?}",
                self.name,
                self.state()
            )));
        }

        info!(
            consumer = %self.name,
            input = %self.settings.input,
            runner_count = self.settings.runner_count,
            "starting consumer"
        );

        let run_token = cln_token.child_token();
        let drain = Arc::new(Drain {
            consumer: self.name.clone(),
            source: Arc::clone(&self.source),
            state: Arc::clone(&self.state),
            source_done: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        });

        let source_handle = self.spawn_source(run_token.clone(), Arc::clone(&drain));
        let callback_handle = self.spawn_callback(run_token.clone());
        let watcher_handle = tokio::spawn({
            let run_token = run_token.clone();
            let drain = Arc::clone(&drain);
            async move {
                run_token.cancelled().await;
                drain.start();
            }
        });

        let runner = Arc::new(Runner {
            consumer: self.name.clone(),
            labels: consumer_metric_labels(&self.name),
            stream: self.source.data(),
            settings: self.settings.clone(),
            encoder: self.encoder,
            callback: Arc::clone(&self.callback),
            acknowledger: Acknowledger::new(&self.name, Arc::clone(&self.source)),
            run_token: run_token.clone(),
            source_done: drain.source_done.clone(),
        });

        let mut runners = JoinSet::new();
        for id in 0..self.settings.runner_count {
            let runner = Arc::clone(&runner);
            runners.spawn(async move { runner.run(id).await });
        }
        while let Some(result) = runners.join_next().await {
            if let Err(e) = result {
                error!(consumer = %self.name, ?e, "runner task failed");
            }
        }

        debug!(consumer = %self.name, "all runners finished");
        drain.start();
        run_token.cancel();

        let mut errors = Errors::new();
        if let Err(e) = join_unit(source_handle, "source").await {
            errors.push(Error::SourceRun(Box::new(e)));
        }
        if let Err(e) = join_unit(callback_handle, "callback").await {
            errors.push(Error::CallbackRun(Box::new(e)));
        }
        if let Err(e) = watcher_handle.await {
            error!(consumer = %self.name, ?e, "drain watcher failed");
        }

        self.state.send_replace(ConsumerState::Stopped);
        info!(consumer = %self.name, failures = errors.len(), "consumer stopped");

        errors.into_result(Error::Shutdown)
    }

    fn spawn_source(&self, run_token: CancellationToken, drain: Arc<Drain>) -> JoinHandle<Result<()>> {
        let source = Arc::clone(&self.source);
        let consumer = self.name.clone();

        tokio::spawn(async move {
            let result = AssertUnwindSafe(source.run(run_token))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(Error::Source(format!(
                        "panic in source run: {}",
                        panic_message(&*panic)
                    )))
                });

            match &result {
                Ok(()) => info!(%consumer, "source finished"),
                Err(e) => error!(%consumer, ?e, "source run failed"),
            }
            drain.source_done.cancel();
            drain.start();
            result
        })
    }

    fn spawn_callback(&self, run_token: CancellationToken) -> JoinHandle<Result<()>> {
        let callback = Arc::clone(&self.callback);
        let consumer = self.name.clone();

        tokio::spawn(async move {
            let result = AssertUnwindSafe(callback.run(run_token.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(Error::Callback(format!(
                        "panic in callback run: {}",
                        panic_message(&*panic)
                    )))
                });

            if let Err(e) = &result {
                error!(%consumer, ?e, "callback run failed, stopping consumer");
                run_token.cancel();
            }
            result
        })
    }
}

async fn join_unit(handle: JoinHandle<Result<()>>, unit: &str) -> Result<()> {
    handle
        .await
        .map_err(|e| Error::Consumer(format!("{unit} task failed: {e}")))?
}

/// Moves the consumer into draining and stops the source, once.
struct Drain {
    consumer: String,
    source: Arc<dyn Source>,
    state: Arc<watch::Sender<ConsumerState>>,
    /// Cancelled once the source returned from `run` or was stopped.
    source_done: CancellationToken,
    stopped: AtomicBool,
}

impl Drain {
    fn start(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.state.send_if_modified(|state| {
            if *state == ConsumerState::Running {
                *state = ConsumerState::Draining;
                true
            } else {
                false
            }
        });
        info!(consumer = %self.consumer, "draining consumer");
        self.source.stop();
        self.source_done.cancel();
    }
}

/// State shared by all runners of a consumer run.
struct Runner<C: ConsumerCallback> {
    consumer: String,
    labels: Vec<(String, String)>,
    stream: MessageStream,
    settings: ConsumerSettings,
    encoder: MessageEncoder,
    callback: Arc<C>,
    acknowledger: Acknowledger,
    run_token: CancellationToken,
    source_done: CancellationToken,
}

impl<C: ConsumerCallback> Runner<C> {
    async fn run(&self, id: usize) {
        debug!(consumer = %self.consumer, runner = id, "starting runner");
        let batch_size = self.settings.batch_size;

        loop {
            let mut batch = Vec::with_capacity(batch_size);
            let received = tokio::select! {
                received = self.stream.recv_many(&mut batch, batch_size) => received,
                _ = tokio::time::sleep(self.settings.idle_timeout) => {
                    if self.source_done.is_cancelled() {
                        info!(consumer = %self.consumer, runner = id, "idle after the source completed, stopping runner");
                        break;
                    }
                    debug!(consumer = %self.consumer, runner = id, "no messages within the idle timeout");
                    continue;
                }
            };

            // the stream is closed and drained
            if received == 0 {
                break;
            }
            self.process_batch(batch).await;
        }

        debug!(consumer = %self.consumer, runner = id, "runner finished");
    }

    /// Processes every message of a receive in order and acknowledges the successful
    /// ones afterwards.
    async fn process_batch(&self, batch: Vec<Message>) {
        consumer_metrics()
            .read_total
            .get_or_create(&self.labels)
            .inc_by(batch.len() as u64);

        let mut acks = Vec::with_capacity(batch.len());
        for msg in batch {
            let ack = if msg.is_aggregate() {
                self.process_aggregate(&msg).await
            } else {
                self.process(&msg).await
            };
            if ack {
                acks.push(msg);
            }
        }

        self.acknowledger.acknowledge_all(&acks).await;
    }

    /// An aggregate is acknowledged only if all of its messages were.
    async fn process_aggregate(&self, aggregate: &Message) -> bool {
        let messages = match aggregate.expand_aggregate() {
            Ok(messages) => messages,
            Err(e) => {
                self.decode_failed(&e);
                return false;
            }
        };

        let mut ack = true;
        for msg in &messages {
            ack &= self.process(msg).await;
        }
        ack
    }

    async fn process(&self, msg: &Message) -> bool {
        if !self.callback.accepts(&msg.attributes) {
            error!(
                consumer = %self.consumer,
                attributes = ?msg.attributes,
                "callback has no model for the message"
            );
            return false;
        }

        let start = Instant::now();
        let (model, attributes) = match self.encoder.decode::<C::Model>(msg) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.decode_failed(&e);
                return false;
            }
        };

        let result = AssertUnwindSafe(self.callback.consume(&self.run_token, model, attributes))
            .catch_unwind()
            .await;

        let metrics = consumer_metrics();
        metrics
            .process_time
            .get_or_create(&self.labels)
            .observe(start.elapsed().as_micros() as f64);

        match result {
            Ok(Ok(ack)) => {
                metrics.processed_total.get_or_create(&self.labels).inc();
                ack
            }
            Ok(Err(e)) => {
                metrics.callback_errors_total.get_or_create(&self.labels).inc();
                error!(consumer = %self.consumer, ?e, "callback failed to consume the message");
                false
            }
            Err(panic) => {
                let e = Error::CallbackPanic(panic_message(&*panic));
                metrics.callback_panics_total.get_or_create(&self.labels).inc();
                error!(consumer = %self.consumer, ?e, "recovered from a callback panic");
                false
            }
        }
    }

    fn decode_failed(&self, e: &Error) {
        consumer_metrics()
            .decode_errors_total
            .get_or_create(&self.labels)
            .inc();
        error!(consumer = %self.consumer, ?e, "dropping message which can not be decoded");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use super::*;
    use crate::message::ATTRIBUTE_ENCODING;
    use crate::source::{AcknowledgeableSource, SourceChannel};

    enum RunBehavior {
        /// Sends the messages, closes the stream and returns.
        Replay(Vec<Message>),
        /// Waits for stop or cancellation, then closes the stream.
        UntilStopped,
        /// Closes the stream and fails.
        Fail,
        /// Returns right away, leaving the stream open.
        Detached,
    }

    struct TestSource {
        channel: SourceChannel,
        behavior: Mutex<Option<RunBehavior>>,
        stopped: CancellationToken,
        stop_calls: AtomicUsize,
        single_acks: Mutex<Vec<Message>>,
        batch_acks: Mutex<Vec<Vec<Message>>>,
    }

    impl TestSource {
        fn new(behavior: RunBehavior) -> Arc<Self> {
            Arc::new(Self {
                channel: SourceChannel::new(1000),
                behavior: Mutex::new(Some(behavior)),
                stopped: CancellationToken::new(),
                stop_calls: AtomicUsize::new(0),
                single_acks: Mutex::new(Vec::new()),
                batch_acks: Mutex::new(Vec::new()),
            })
        }

        fn acked(&self) -> usize {
            self.single_acks.lock().len() + self.batch_acks.lock().iter().map(Vec::len).sum::<usize>()
        }
    }

    #[async_trait]
    impl Source for TestSource {
        fn data(&self) -> MessageStream {
            self.channel.stream()
        }

        async fn run(&self, cln_token: CancellationToken) -> Result<()> {
            let behavior = self.behavior.lock().take();
            match behavior {
                Some(RunBehavior::Replay(messages)) => {
                    for msg in messages {
                        self.channel.send(msg).await?;
                    }
                    self.channel.close();
                    Ok(())
                }
                Some(RunBehavior::UntilStopped) => {
                    tokio::select! {
                        _ = self.stopped.cancelled() => {}
                        _ = cln_token.cancelled() => {}
                    }
                    self.channel.close();
                    Ok(())
                }
                Some(RunBehavior::Fail) => {
                    self.channel.close();
                    Err(Error::Source("read error".to_string()))
                }
                Some(RunBehavior::Detached) | None => Ok(()),
            }
        }

        fn stop(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.stopped.cancel();
        }

        fn as_acknowledgeable(&self) -> Option<&dyn AcknowledgeableSource> {
            Some(self)
        }
    }

    #[async_trait]
    impl AcknowledgeableSource for TestSource {
        async fn ack(&self, msg: &Message) -> Result<()> {
            self.single_acks.lock().push(msg.clone());
            Ok(())
        }

        async fn ack_batch(&self, msgs: &[Message]) -> Result<()> {
            self.batch_acks.lock().push(msgs.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestCallback {
        consumed: Mutex<Vec<(String, Attributes)>>,
        run_error: Option<&'static str>,
        wait_for_cancel: bool,
        panic_on: Option<&'static str>,
        reject_all: bool,
    }

    #[async_trait]
    impl ConsumerCallback for TestCallback {
        type Model = String;

        async fn run(&self, cln_token: CancellationToken) -> Result<()> {
            if self.wait_for_cancel {
                cln_token.cancelled().await;
            }
            match self.run_error {
                Some(e) => Err(Error::Callback(e.to_string())),
                None => Ok(()),
            }
        }

        fn accepts(&self, _attributes: &Attributes) -> bool {
            !self.reject_all
        }

        async fn consume(
            &self,
            _cln_token: &CancellationToken,
            model: String,
            attributes: Attributes,
        ) -> Result<bool> {
            self.consumed.lock().push((model.clone(), attributes));
            if self.panic_on == Some(model.as_str()) {
                panic!("{model}");
            }
            Ok(true)
        }
    }

    fn json_message(body: &str, attributes: Attributes) -> Message {
        MessageEncoder::default().encode(body, attributes).unwrap()
    }

    fn settings() -> ConsumerSettings {
        ConsumerSettings::new("test").idle_timeout(Duration::from_millis(100))
    }

    fn consumer(
        source: &Arc<TestSource>,
        callback: TestCallback,
        settings: ConsumerSettings,
    ) -> Consumer<TestCallback> {
        Consumer::new(
            "test",
            settings,
            Arc::clone(source) as Arc<dyn Source>,
            callback,
        )
        .unwrap()
    }

    fn consumed_models(consumer: &Consumer<TestCallback>) -> Vec<String> {
        consumer
            .callback()
            .consumed
            .lock()
            .iter()
            .map(|(model, _)| model.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_run() {
        let source = TestSource::new(RunBehavior::Replay(vec![
            json_message("foo", Attributes::new()),
            json_message("bar", Attributes::new()),
            json_message("foobar", Attributes::new()),
        ]));
        let consumer = consumer(&source, TestCallback::default(), settings());
        assert_eq!(consumer.state(), ConsumerState::Idle);

        consumer.run(CancellationToken::new()).await.unwrap();

        assert_eq!(consumed_models(&consumer), vec!["foo", "bar", "foobar"]);
        for (_, attributes) in consumer.callback().consumed.lock().iter() {
            assert!(attributes.is_empty());
        }
        assert_eq!(source.acked(), 3);
        assert_eq!(source.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn test_run_only_once() {
        let source = TestSource::new(RunBehavior::Replay(vec![]));
        let consumer = consumer(&source, TestCallback::default(), settings());

        consumer.run(CancellationToken::new()).await.unwrap();
        let err = consumer.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Consumer(_)));
    }

    #[tokio::test]
    async fn test_rejected_model() {
        let source = TestSource::new(RunBehavior::Replay(vec![json_message(
            "foo",
            HashMap::from([("bla".to_string(), json!("blub"))]),
        )]));
        let callback = TestCallback {
            reject_all: true,
            ..Default::default()
        };
        let consumer = consumer(&source, callback, settings());

        consumer.run(CancellationToken::new()).await.unwrap();

        assert!(consumed_models(&consumer).is_empty());
        assert_eq!(source.acked(), 0);
    }

    #[tokio::test]
    async fn test_context_cancel() {
        let source = TestSource::new(RunBehavior::UntilStopped);
        let callback = TestCallback {
            wait_for_cancel: true,
            ..Default::default()
        };
        let consumer = consumer(&source, callback, settings());

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        consumer.run(token).await.unwrap();
        assert_eq!(source.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn test_source_run_error() {
        let source = TestSource::new(RunBehavior::Fail);
        let callback = TestCallback {
            wait_for_cancel: true,
            ..Default::default()
        };
        let consumer = consumer(&source, callback, settings());

        let err = consumer.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "error while waiting for all routines to stop: \
             error during run of the consumer input: Source Error - read error"
        );
    }

    #[tokio::test]
    async fn test_callback_run_error() {
        let source = TestSource::new(RunBehavior::UntilStopped);
        let callback = TestCallback {
            run_error: Some("consumer callback run error"),
            ..Default::default()
        };
        let consumer = consumer(&source, callback, settings());

        let err = consumer.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "error while waiting for all routines to stop: \
             error during run of the consumer callback: Callback Error - consumer callback run error"
        );
        assert_eq!(source.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_source_and_callback_fail() {
        let source = TestSource::new(RunBehavior::Fail);
        let callback = TestCallback {
            run_error: Some("boom"),
            ..Default::default()
        };
        let consumer = consumer(&source, callback, settings());

        let err = consumer.run(CancellationToken::new()).await.unwrap_err();
        let Error::Shutdown(errors) = &err else {
            panic!("expected a shutdown error, got {err:?}");
        };
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors.iter().next(), Some(Error::SourceRun(_))));
        assert!(matches!(errors.iter().nth(1), Some(Error::CallbackRun(_))));
    }

    #[tokio::test]
    async fn test_callback_panic() {
        let source = TestSource::new(RunBehavior::Replay(vec![
            json_message("foo", Attributes::new()),
            json_message("bar", Attributes::new()),
        ]));
        let callback = TestCallback {
            panic_on: Some("foo"),
            ..Default::default()
        };
        let consumer = consumer(&source, callback, settings().batch_size(2));

        consumer.run(CancellationToken::new()).await.unwrap();

        assert_eq!(consumed_models(&consumer), vec!["foo", "bar"]);
        assert_eq!(source.acked(), 1);
        let acked: Vec<Message> = source
            .single_acks
            .lock()
            .iter()
            .chain(source.batch_acks.lock().iter().flatten())
            .cloned()
            .collect();
        assert_eq!(acked[0].body, r#""bar""#);
    }

    #[tokio::test]
    async fn test_aggregate_message() {
        let aggregate = Message::aggregate(&[
            json_message("foo", HashMap::from([("attr1".to_string(), json!("a"))])),
            json_message("bar", HashMap::from([("attr1".to_string(), json!("b"))])),
        ])
        .unwrap();
        let source = TestSource::new(RunBehavior::Replay(vec![aggregate.clone()]));
        let consumer = consumer(&source, TestCallback::default(), settings());

        consumer.run(CancellationToken::new()).await.unwrap();

        let consumed = consumer.callback().consumed.lock().clone();
        assert_eq!(
            consumed,
            vec![
                ("foo".to_string(), HashMap::from([("attr1".to_string(), json!("a"))])),
                ("bar".to_string(), HashMap::from([("attr1".to_string(), json!("b"))])),
            ]
        );
        assert!(
            consumed
                .iter()
                .all(|(_, attributes)| !attributes.contains_key(ATTRIBUTE_ENCODING))
        );
        assert_eq!(*source.single_acks.lock(), vec![aggregate]);
    }

    #[tokio::test]
    async fn test_decode_errors_are_dropped() {
        let mut broken = json_message("x", Attributes::new());
        broken.body = "{not json".to_string();
        let mut broken_aggregate = Message::aggregate(&[json_message("y", Attributes::new())]).unwrap();
        broken_aggregate.body = "[".to_string();

        let source = TestSource::new(RunBehavior::Replay(vec![
            broken,
            broken_aggregate,
            json_message("ok", Attributes::new()),
        ]));
        let consumer = consumer(&source, TestCallback::default(), settings());

        consumer.run(CancellationToken::new()).await.unwrap();

        assert_eq!(consumed_models(&consumer), vec!["ok"]);
        assert_eq!(source.acked(), 1);
    }

    #[tokio::test]
    async fn test_batch_acknowledgement() {
        let messages: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|body| json_message(body, Attributes::new()))
            .collect();
        let source = TestSource::new(RunBehavior::Replay(messages));
        // the source fills the stream before the runner starts taking from it
        source.run(CancellationToken::new()).await.unwrap();

        let consumer = consumer(&source, TestCallback::default(), settings().batch_size(10));
        consumer.run(CancellationToken::new()).await.unwrap();

        assert!(source.single_acks.lock().is_empty());
        let batches = source.batch_acks.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn test_many_runners() {
        let messages: Vec<_> = (0..100)
            .map(|i| json_message(&i.to_string(), Attributes::new()))
            .collect();
        let source = TestSource::new(RunBehavior::Replay(messages));
        let consumer = consumer(&source, TestCallback::default(), settings().runner_count(4));

        consumer.run(CancellationToken::new()).await.unwrap();

        let mut consumed: Vec<u32> = consumed_models(&consumer)
            .iter()
            .map(|model| model.parse().unwrap())
            .collect();
        consumed.sort_unstable();
        assert_eq!(consumed, (0..100).collect::<Vec<_>>());
        assert_eq!(source.acked(), 100);
    }

    #[tokio::test]
    async fn test_idle_timeout_after_source_completion() {
        let source = TestSource::new(RunBehavior::Detached);
        source
            .channel
            .send(json_message("late", Attributes::new()))
            .await
            .unwrap();
        let consumer = consumer(&source, TestCallback::default(), settings());

        // the stream is never closed, only the idle timeout ends the runners
        tokio::time::timeout(Duration::from_secs(5), consumer.run(CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(consumed_models(&consumer), vec!["late"]);
    }

    #[tokio::test]
    async fn test_idle_timeout_keeps_running_source_alive() {
        let source = TestSource::new(RunBehavior::UntilStopped);
        let callback = TestCallback {
            wait_for_cancel: true,
            ..Default::default()
        };
        let consumer = consumer(&source, callback, settings().runner_count(2));

        let token = CancellationToken::new();
        let publisher = tokio::spawn({
            let source = Arc::clone(&source);
            let token = token.clone();
            async move {
                // several idle periods pass before anything arrives
                tokio::time::sleep(Duration::from_millis(450)).await;
                source
                    .channel
                    .send(json_message("late", Attributes::new()))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel();
            }
        });

        consumer.run(token).await.unwrap();
        publisher.await.unwrap();

        assert_eq!(consumed_models(&consumer), vec!["late"]);
        assert_eq!(source.acked(), 1);
        assert_eq!(source.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_text_encoding() {
        let msg = MessageEncoder::new(crate::encoding::Encoding::Text)
            .encode("plain text", HashMap::from([("k".to_string(), Value::from(1))]))
            .unwrap();
        let source = TestSource::new(RunBehavior::Replay(vec![msg]));
        let consumer = consumer(&source, TestCallback::default(), settings());

        consumer.run(CancellationToken::new()).await.unwrap();

        let consumed = consumer.callback().consumed.lock().clone();
        assert_eq!(consumed[0].0, "plain text");
        assert_eq!(consumed[0].1, HashMap::from([("k".to_string(), Value::from(1))]));
    }

    #[test]
    fn test_invalid_settings() {
        let source = TestSource::new(RunBehavior::Detached);
        let result = Consumer::new(
            "test",
            settings().runner_count(0),
            source as Arc<dyn Source>,
            TestCallback::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
