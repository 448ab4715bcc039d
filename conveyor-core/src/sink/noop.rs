use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::config::Config;
use crate::message::WritableMessage;
use crate::sink::{Sink, SinkContext};

/// Discards every message.
pub struct NoopSink;

pub(crate) fn new_from_config(
    _ctx: &SinkContext,
    _config: &Config,
    _name: &str,
) -> Result<Arc<dyn Sink>> {
    Ok(Arc::new(NoopSink))
}

#[async_trait]
impl Sink for NoopSink {
    async fn write_one(&self, _msg: &dyn WritableMessage) -> Result<()> {
        Ok(())
    }

    async fn write(&self, _batch: &[Box<dyn WritableMessage>]) -> Result<()> {
        Ok(())
    }
}
