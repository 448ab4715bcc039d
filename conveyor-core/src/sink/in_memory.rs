use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::Result;
use crate::config::Config;
use crate::message::{Message, WritableMessage};
use crate::sink::{Sink, SinkContext, render};

/// Keeps every written message, mostly useful in tests and local runs.
#[derive(Debug, Default)]
pub struct InMemorySink {
    messages: Mutex<Vec<Message>>,
}

impl InMemorySink {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn write_one(&self, msg: &dyn WritableMessage) -> Result<()> {
        let msg = msg.to_message()?;
        self.messages.lock().push(msg);
        Ok(())
    }

    async fn write(&self, batch: &[Box<dyn WritableMessage>]) -> Result<()> {
        let messages = render(batch)?;
        self.messages.lock().extend(messages);
        Ok(())
    }
}

/// The in-memory sinks of a [SinkContext], shared by name so the same output
/// configured twice writes into the same place.
#[derive(Debug, Default)]
pub struct InMemorySinks {
    sinks: Mutex<HashMap<String, Arc<InMemorySink>>>,
}

impl InMemorySinks {
    pub fn get(&self, name: &str) -> Option<Arc<InMemorySink>> {
        self.sinks.lock().get(name).map(Arc::clone)
    }

    pub fn get_or_create(&self, name: &str) -> Arc<InMemorySink> {
        let mut sinks = self.sinks.lock();
        Arc::clone(sinks.entry(name.to_string()).or_default())
    }
}

pub(crate) fn new_from_config(
    ctx: &SinkContext,
    _config: &Config,
    name: &str,
) -> Result<Arc<dyn Sink>> {
    Ok(ctx.in_memory().get_or_create(name))
}
