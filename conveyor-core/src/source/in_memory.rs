use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::message::Message;
use crate::source::{AcknowledgeableSource, MessageStream, Source, SourceChannel};

#[derive(Default)]
pub struct InMemorySource {
    channel: SourceChannel,
    stopped: CancellationToken,
    acked: Mutex<Vec<Message>>,
}

impl InMemorySource {
    pub fn new(capacity: usize) -> Self {
        Self {
            channel: SourceChannel::new(capacity),
            stopped: CancellationToken::new(),
            acked: Mutex::new(Vec::new()),
        }
    }

    pub async fn publish(&self, msg: Message) -> Result<()> {
        self.channel.send(msg).await
    }

    /// No more messages will be published, `run` returns and the stream ends once
    /// drained.
    pub fn close(&self) {
        self.stopped.cancel();
        self.channel.close();
    }

    /// Messages acknowledged so far, in order.
    pub fn acked(&self) -> Vec<Message> {
        self.acked.lock().clone()
    }
}

#[async_trait]
impl Source for InMemorySource {
    fn data(&self) -> MessageStream {
        self.channel.stream()
    }

    async fn run(&self, cln_token: CancellationToken) -> Result<()> {
        tokio::select! {
            _ = self.stopped.cancelled() => {}
            _ = cln_token.cancelled() => {}
        }
        self.channel.close();
        Ok(())
    }

    fn stop(&self) {
        self.close();
    }

    fn as_acknowledgeable(&self) -> Option<&dyn AcknowledgeableSource> {
        Some(self)
    }
}

#[async_trait]
impl AcknowledgeableSource for InMemorySource {
    async fn ack(&self, msg: &Message) -> Result<()> {
        self.acked.lock().push(msg.clone());
        Ok(())
    }

    async fn ack_batch(&self, msgs: &[Message]) -> Result<()> {
        self.acked.lock().extend_from_slice(msgs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_until_closed() {
        let source = std::sync::Arc::new(InMemorySource::new(10));
        let stream = source.data();

        let runner = std::sync::Arc::clone(&source);
        let handle = tokio::spawn(async move { runner.run(CancellationToken::new()).await });

        source
            .publish(Message::new("1", Default::default()))
            .await
            .unwrap();
        source.close();
        handle.await.unwrap().unwrap();

        assert_eq!(stream.recv().await.unwrap().body, "1");
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let source = InMemorySource::new(10);
        let token = CancellationToken::new();
        token.cancel();
        source.run(token).await.unwrap();
        assert!(source.publish(Message::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_acks() {
        let source = InMemorySource::default();
        let acker = source.as_acknowledgeable().unwrap();
        acker.ack(&Message::new("1", Default::default())).await.unwrap();
        acker
            .ack_batch(&[
                Message::new("2", Default::default()),
                Message::new("3", Default::default()),
            ])
            .await
            .unwrap();

        let bodies: Vec<_> = source.acked().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["1", "2", "3"]);
    }
}
