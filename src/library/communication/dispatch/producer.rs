use super::ProducerOptions;
use crate::library::communication::event::{canonicalize, Message, QueueDescriptor, QueueProvider};
use crate::library::{BoxedError, EmptyResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Sends messages to the queue associated with their type
///
/// Unless [`ProducerOptions::ignore_hash`] is set, messages whose content is already waiting in
/// the queue are silently dropped, which makes sending idempotent under retries.
pub struct Producer {
    provider: Arc<dyn QueueProvider>,
    options: ProducerOptions,
}

impl Producer {
    /// Creates a new instance sending through the given provider
    pub fn new(provider: Arc<dyn QueueProvider>, options: ProducerOptions) -> Self {
        Self { provider, options }
    }

    /// Enqueues a message into the queue associated with its type
    pub async fn send<M: Message>(&self, message: &M) -> EmptyResult {
        self.send_to(&M::queue(), message).await
    }

    /// Enqueues a message into an explicitly named queue
    #[instrument(skip(self, message), fields(queue = %queue))]
    pub async fn send_to<M>(&self, queue: &QueueDescriptor, message: &M) -> EmptyResult
    where
        M: Serialize + Sync + ?Sized,
    {
        let payload = canonicalize(message)?;
        self.provider
            .enqueue(queue, &payload, !self.options.ignore_hash)
            .await
    }

    /// Whether a message with identical content is currently waiting or being processed
    ///
    /// Always returns `false` for messages sent while deduplication has been disabled.
    pub async fn exists<M: Message>(&self, message: &M) -> Result<bool, BoxedError> {
        let payload = canonicalize(message)?;
        self.provider.contains(&M::queue(), &payload).await
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::implementation::memory::MemoryQueueProvider;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct SampleMessage {
        text: String,
    }

    impl Message for SampleMessage {
        fn queue() -> QueueDescriptor {
            QueueDescriptor::new("TestQueue")
        }
    }

    fn sample(text: &str) -> SampleMessage {
        SampleMessage { text: text.into() }
    }

    #[tokio::test]
    async fn send_to_queue_of_message_type() {
        let provider = MemoryQueueProvider::new();
        let producer = Producer::new(Arc::new(provider.clone()), ProducerOptions::default());

        producer.send(&sample("m1")).await.unwrap();

        assert_eq!(provider.ready(&"TestQueue".into()).len(), 1);
        assert!(producer.exists(&sample("m1")).await.unwrap());
        assert!(!producer.exists(&sample("m2")).await.unwrap());
    }

    #[tokio::test]
    async fn drop_duplicates_unless_ignored() {
        let provider = MemoryQueueProvider::new();
        let queue = SampleMessage::queue();

        let deduplicating = Producer::new(Arc::new(provider.clone()), ProducerOptions::default());
        deduplicating.send(&sample("m1")).await.unwrap();
        deduplicating.send(&sample("m1")).await.unwrap();
        assert_eq!(provider.ready(&queue).len(), 1);

        let ignoring = Producer::new(
            Arc::new(provider.clone()),
            ProducerOptions::default().ignore_hash(true),
        );
        ignoring.send(&sample("m1")).await.unwrap();
        assert_eq!(provider.ready(&queue).len(), 2);
    }

    #[tokio::test]
    async fn send_to_explicit_queue() {
        let provider = MemoryQueueProvider::new();
        let producer = Producer::new(Arc::new(provider.clone()), ProducerOptions::default());
        let queue = QueueDescriptor::new("Elsewhere");

        producer.send_to(&queue, &sample("m1")).await.unwrap();

        assert_eq!(provider.ready(&queue).len(), 1);
        assert!(provider.ready(&SampleMessage::queue()).is_empty());
    }
}
