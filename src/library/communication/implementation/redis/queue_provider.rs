use super::scripts::{COMPLETE, ENQUEUE_UNIQUE, RECOVER, RETRY, WITHDRAW};
use super::{PubSubResource, PubSubResourceError, RedisFactory};
use crate::library::communication::event::{
    annotate, content_hash, refresh, Acknowledgement, EntryHandler, QueueDescriptor, QueueEntry,
    QueueProvider,
};
use crate::library::helpers::Backoff;
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::{AsyncCommands, Msg};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

type WakeStream = BoxStream<'static, Result<Msg, PubSubResourceError>>;

/// Queue provider implementation using [Redis lists](https://redis.io/docs/data-types/lists/)
///
/// Entries are claimed with `RPOPLPUSH`, which atomically moves them into the processing list.
/// Idle consumers wait for notifications on the wake channel of the queue and additionally
/// re-check the list every `idle_poll` in case a notification went missing.
pub struct RedisQueueProvider<F: RedisFactory> {
    factory: F,
    idle_poll: Duration,
}

impl<F: RedisFactory> RedisQueueProvider<F> {
    /// Creates a new instance with a given [`RedisFactory`]
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            idle_poll: Duration::from_secs(30),
        }
    }

    /// Overrides the interval at which idle consumers re-check the ready list
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    async fn subscribe(&self, queue: &QueueDescriptor) -> Result<WakeStream, BoxedError> {
        let mut pubsub = self.factory.pubsub().await?;
        pubsub.subscribe(&queue.wake_channel()).await?;
        Ok(pubsub.into_on_message())
    }

    async fn claim(&self, queue: &QueueDescriptor) -> Result<Option<String>, BoxedError> {
        let mut con = self.factory.connection().await?;
        let record: Option<String> = con.rpoplpush(queue.key(), queue.processing_key()).await?;
        Ok(record)
    }
}

/// Sleeps for the given duration unless cancelled earlier
async fn pause(cancellation: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = cancellation.cancelled() => {}
        _ = sleep(duration) => {}
    }
}

#[async_trait]
impl<F> QueueProvider for RedisQueueProvider<F>
where
    F: RedisFactory,
{
    #[instrument(skip(self, payload), fields(queue = %queue))]
    async fn enqueue(
        &self,
        queue: &QueueDescriptor,
        payload: &str,
        deduplicate: bool,
    ) -> EmptyResult {
        let record = annotate(payload, Utc::now())?;
        let mut con = self.factory.connection().await?;

        if deduplicate {
            let added: u8 = ENQUEUE_UNIQUE
                .key(queue.key())
                .key(queue.hash_key())
                .arg(content_hash(payload))
                .arg(record)
                .arg(queue.wake_channel())
                .invoke_async(&mut con)
                .await?;

            if added == 0 {
                debug!("Skipping duplicate message");
            }
        } else {
            redis::pipe()
                .atomic()
                .lpush(queue.key(), record)
                .ignore()
                .publish(queue.wake_channel(), "")
                .ignore()
                .query_async::<_, ()>(&mut con)
                .await?;
        }

        Ok(())
    }

    async fn contains(&self, queue: &QueueDescriptor, payload: &str) -> Result<bool, BoxedError> {
        let mut con = self.factory.connection().await?;
        let known: bool = con.hexists(queue.hash_key(), content_hash(payload)).await?;
        Ok(known)
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn recover(&self, queue: &QueueDescriptor) -> Result<usize, BoxedError> {
        let mut con = self.factory.connection().await?;

        let recovered: usize = RECOVER
            .key(queue.processing_key())
            .key(queue.key())
            .arg(queue.wake_channel())
            .invoke_async(&mut con)
            .await?;

        if recovered > 0 {
            info!(recovered, "Recovered abandoned messages");
        }

        Ok(recovered)
    }

    /// Claims entries from the ready list using the following steps:
    ///
    /// 1. Subscribe to the wake channel so that no notification is missed
    /// 2. Claim and handle entries until the list is empty
    /// 3. Wait for a notification, the idle poll or cancellation and continue with 2.
    ///
    /// Failures are treated as transient and retried with an exponential backoff.
    #[instrument(skip(self, handler, cancellation), fields(queue = %queue))]
    async fn consume(
        &self,
        queue: &QueueDescriptor,
        handler: &dyn EntryHandler,
        cancellation: CancellationToken,
    ) -> EmptyResult {
        let mut backoff = Backoff::default();
        let mut wake: Option<WakeStream> = None;

        while !cancellation.is_cancelled() {
            if wake.is_none() {
                match self.subscribe(queue).await {
                    Ok(stream) => wake = Some(stream),
                    Err(error) => {
                        error!(?error, "Unable to subscribe to wake channel");
                        pause(&cancellation, backoff.next().unwrap_or_default()).await;
                        continue;
                    }
                }
            }

            match self.claim(queue).await {
                Ok(Some(record)) => {
                    trace!("Claimed message");
                    backoff.reset();
                    handler.handle(QueueEntry::new(queue.clone(), record)).await;
                }
                Ok(None) => {
                    backoff.reset();

                    let closed = match wake.as_mut() {
                        Some(stream) => tokio::select! {
                            _ = cancellation.cancelled() => false,
                            message = stream.next() => !matches!(message, Some(Ok(_))),
                            _ = sleep(self.idle_poll) => {
                                trace!("Polling idle queue");
                                false
                            }
                        },
                        None => true,
                    };

                    if closed {
                        warn!("Wake channel closed, resubscribing");
                        wake = None;
                    }
                }
                Err(error) => {
                    error!(?error, "Unable to claim message");
                    pause(&cancellation, backoff.next().unwrap_or_default()).await;
                }
            }
        }

        // Unsubscribe before returning in-flight messages
        drop(wake);

        if let Err(error) = self.recover(queue).await {
            error!(?error, "Unable to return in-flight messages");
        }

        Ok(())
    }

    #[instrument(skip(self, entry), fields(queue = %entry.queue()))]
    async fn acknowledge(&self, entry: &QueueEntry, outcome: Acknowledgement) -> EmptyResult {
        let queue = entry.queue();
        let mut con = self.factory.connection().await?;

        match outcome {
            Acknowledgement::Completed => {
                let hash = entry.content_hash().unwrap_or_else(|error| {
                    warn!(?error, "Unable to release hash of malformed record");
                    String::new()
                });

                let removed: u8 = COMPLETE
                    .key(queue.processing_key())
                    .key(queue.hash_key())
                    .arg(entry.record())
                    .arg(hash)
                    .invoke_async(&mut con)
                    .await?;

                if removed == 0 {
                    debug!("Completed message was no longer in flight");
                }
            }
            Acknowledgement::Retry => {
                let moved: u8 = RETRY
                    .key(queue.processing_key())
                    .key(queue.key())
                    .arg(entry.record())
                    .arg(refresh(entry.record(), Utc::now())?)
                    .arg(queue.wake_channel())
                    .invoke_async(&mut con)
                    .await?;

                if moved == 0 {
                    debug!("Retried message was no longer in flight");
                }
            }
            Acknowledgement::Withdraw => {
                let moved: u8 = WITHDRAW
                    .key(queue.processing_key())
                    .key(queue.key())
                    .arg(entry.record())
                    .arg(queue.wake_channel())
                    .invoke_async(&mut con)
                    .await?;

                if moved == 0 {
                    debug!("Withdrawn message was no longer in flight");
                }
            }
        }

        Ok(())
    }
}
