//! Narrow contracts of the backend clients the sinks talk to, and the registry
//! which hands out one cached client per client name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::components::sink::{FifoSettings, RedrivePolicy};
use crate::{Error, Result};

/// Properties of a queue created by the SQS sink.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueProperties {
    pub name: String,
    pub visibility_timeout: u32,
    pub redrive_policy: RedrivePolicy,
    pub fifo: FifoSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Unique within one batch.
    pub id: String,
    pub body: String,
    pub delay_seconds: Option<u32>,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub partition_key: String,
    pub data: Bytes,
}

/// A single failed entry of a batch request. `id` is the entry id for queues and the
/// partition key for stream records.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub id: String,
    pub code: String,
    pub message: String,
    /// The request itself was wrong, retrying won't help.
    pub sender_fault: bool,
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Creates the queue if it does not exist yet and returns its url.
    async fn create_queue(&self, properties: &QueueProperties) -> Result<String>;

    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<QueueEntry>,
    ) -> Result<Vec<BatchFailure>>;
}

#[async_trait]
pub trait TopicClient: Send + Sync {
    /// Creates the topic if it does not exist yet and returns its identifier.
    async fn create_topic(&self, name: &str) -> Result<String>;

    async fn publish(
        &self,
        topic: &str,
        body: String,
        attributes: HashMap<String, String>,
    ) -> Result<()>;
}

#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn put_records(
        &self,
        stream_name: &str,
        records: Vec<StreamRecord>,
    ) -> Result<Vec<BatchFailure>>;
}

#[async_trait]
pub trait ListClient: Send + Sync {
    /// Appends the values to the list and returns its new length.
    async fn rpush(&self, key: &str, values: Vec<String>) -> Result<usize>;
}

type ClientFactory<C> = Box<dyn Fn(&str) -> Result<Arc<C>> + Send + Sync>;

struct ClientCache<C: ?Sized> {
    kind: &'static str,
    factory: Option<ClientFactory<C>>,
    clients: Mutex<HashMap<String, Arc<C>>>,
}

impl<C: ?Sized> ClientCache<C> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factory: None,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, name: &str) -> Result<Arc<C>> {
        // the lock is held while constructing so each name is built at most once
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(name) {
            return Ok(Arc::clone(client));
        }

        let factory = self.factory.as_ref().ok_or_else(|| {
            Error::Config(format!("no {} client factory registered", self.kind))
        })?;
        let client = factory(name)
            .map_err(|e| Error::Client(format!("can not create {} client {name}: {e}", self.kind)))?;
        clients.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }
}

/// ClientRegistry is the per-process home of backend clients. Clients are created
/// lazily on first use through the registered factory and cached by client name.
pub struct ClientRegistry {
    queues: ClientCache<dyn QueueClient>,
    topics: ClientCache<dyn TopicClient>,
    streams: ClientCache<dyn StreamClient>,
    lists: ClientCache<dyn ListClient>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self {
            queues: ClientCache::new("queue"),
            topics: ClientCache::new("topic"),
            streams: ClientCache::new("stream"),
            lists: ClientCache::new("list"),
        }
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_client_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn QueueClient>> + Send + Sync + 'static,
    {
        self.queues.factory = Some(Box::new(factory));
        self
    }

    pub fn with_topic_client_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn TopicClient>> + Send + Sync + 'static,
    {
        self.topics.factory = Some(Box::new(factory));
        self
    }

    pub fn with_stream_client_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn StreamClient>> + Send + Sync + 'static,
    {
        self.streams.factory = Some(Box::new(factory));
        self
    }

    pub fn with_list_client_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn ListClient>> + Send + Sync + 'static,
    {
        self.lists.factory = Some(Box::new(factory));
        self
    }

    pub fn queue_client(&self, name: &str) -> Result<Arc<dyn QueueClient>> {
        self.queues.get(name)
    }

    pub fn topic_client(&self, name: &str) -> Result<Arc<dyn TopicClient>> {
        self.topics.get(name)
    }

    pub fn stream_client(&self, name: &str) -> Result<Arc<dyn StreamClient>> {
        self.streams.get(name)
    }

    pub fn list_client(&self, name: &str) -> Result<Arc<dyn ListClient>> {
        self.lists.get(name)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::test_utils::FakeQueueClient;
    use super::*;

    #[test]
    fn test_clients_are_cached_per_name() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&constructed);
        let registry = ClientRegistry::new().with_queue_client_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeQueueClient::default()) as Arc<dyn QueueClient>)
        });

        let first = registry.queue_client("default").unwrap();
        let second = registry.queue_client("default").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);

        registry.queue_client("other").unwrap();
        assert_eq!(constructed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_factory() {
        let registry = ClientRegistry::new();
        let err = registry.stream_client("default").err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_factory_failure_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let registry = ClientRegistry::new().with_list_client_factory(move |name| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Client(format!("no server {name}")))
        });

        assert!(registry.list_client("default").is_err());
        assert!(registry.list_client("default").is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
