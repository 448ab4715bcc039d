use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::consumer::ConsumerCallback;
use crate::message::Attributes;
use crate::producer::Producer;

/// ForwardCallback re-publishes every consumed message, attributes included, through
/// a [Producer].
pub struct ForwardCallback {
    producer: Producer,
}

impl ForwardCallback {
    pub fn new(producer: Producer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl ConsumerCallback for ForwardCallback {
    type Model = Value;

    async fn run(&self, cln_token: CancellationToken) -> Result<()> {
        cln_token.cancelled().await;
        Ok(())
    }

    async fn consume(
        &self,
        _cln_token: &CancellationToken,
        model: Value,
        attributes: Attributes,
    ) -> Result<bool> {
        self.producer.write_one(&model, attributes).await?;
        Ok(true)
    }
}
