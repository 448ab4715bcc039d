//! A [Source] is the origin of the messages a consumer processes. It owns the sending
//! half of a channel and hands out [MessageStream]s over the receiving half, which
//! all runners of a consumer read from.
//!
//! Sources able to acknowledge messages expose it through
//! [Source::as_acknowledgeable], everybody else gets the default `None` and the
//! consumer silently skips acknowledging.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::config::components::source::{FileSourceSettings, SourceType, input_key};
use crate::message::Message;
use crate::{Error, Result};

/// Reads messages from a file, one JSON envelope per line.
pub mod file;

/// Source fed by hand, for tests and embedding applications.
pub mod in_memory;

pub use file::FileSource;
pub use in_memory::InMemorySource;

const DEFAULT_CHANNEL_CAPACITY: usize = 500;

#[async_trait]
pub trait Source: Send + Sync {
    /// The stream of messages produced by this source. It ends once the source closed
    /// it and every buffered message was taken.
    fn data(&self) -> MessageStream;

    /// Produces messages until the source is exhausted, stopped or the token is
    /// cancelled. The stream has to be closed when it returns.
    async fn run(&self, cln_token: CancellationToken) -> Result<()>;

    /// Signals the source to stop producing. Calling it more than once is fine.
    fn stop(&self);

    fn as_acknowledgeable(&self) -> Option<&dyn AcknowledgeableSource> {
        None
    }
}

/// Optional capability of a [Source] to be told a message was handled.
#[async_trait]
pub trait AcknowledgeableSource: Send + Sync {
    async fn ack(&self, msg: &Message) -> Result<()>;

    async fn ack_batch(&self, msgs: &[Message]) -> Result<()>;
}

/// MessageStream is a cloneable read handle of a source channel. Every message is
/// received by exactly one reader.
#[derive(Clone)]
pub struct MessageStream {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>,
}

impl MessageStream {
    pub async fn recv(&self) -> Option<Message> {
        self.rx.lock().await.recv().await
    }

    /// Receives up to `limit` messages into `buffer`, waiting for at least one.
    /// Returns 0 once the stream is closed and drained.
    pub async fn recv_many(&self, buffer: &mut Vec<Message>, limit: usize) -> usize {
        self.rx.lock().await.recv_many(buffer, limit).await
    }
}

/// SourceChannel is the producing side sources build upon. Closing it drops the
/// sender so readers see the end of the stream after the buffered messages.
pub struct SourceChannel {
    tx: parking_lot::Mutex<Option<mpsc::Sender<Message>>>,
    stream: MessageStream,
}

impl Default for SourceChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl SourceChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            stream: MessageStream {
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            },
        }
    }

    pub fn stream(&self) -> MessageStream {
        self.stream.clone()
    }

    pub async fn send(&self, msg: Message) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| Error::Source("source channel is closed".to_string()))?;
        tx.send(msg)
            .await
            .map_err(|_| Error::Source("source channel receiver is gone".to_string()))
    }

    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Builds the input configured under `stream.input.<name>`.
pub fn build_source(config: &Config, name: &str) -> Result<Arc<dyn Source>> {
    match SourceType::from_config(config, name)? {
        SourceType::File => {
            let settings: FileSourceSettings = config.unmarshal_key(&input_key(name))?;
            if settings.filename.is_empty() {
                return Err(Error::Config(format!("input {name} needs a filename")));
            }
            Ok(Arc::new(FileSource::new(settings.filename)))
        }
    }
}
