use super::{QueueDescriptor, QueueEntry};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Terminal disposition of a claimed [`QueueEntry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Processing concluded, the entry is removed and its content hash released
    Completed,
    /// The entry is removed from processing and enqueued again with a fresh timestamp
    Retry,
    /// Processing has been abandoned by a shutting down consumer. The entry is returned
    /// to the ready list if it is still being tracked as in-flight.
    Withdraw,
}

impl fmt::Display for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Receiver of claimed entries, invoked by [`QueueProvider::dequeue`]
///
/// The provider awaits the handler before claiming the next entry. Implementations are expected
/// to eventually [`acknowledge`](QueueProvider::acknowledge) every entry they receive, however,
/// they may also do so after returning.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    /// Processes a freshly claimed entry
    async fn handle(&self, entry: QueueEntry);
}

/// Backing store for queues with at-least-once delivery semantics
///
/// Implementations have to uphold the following invariants:
///
/// - A claimed entry is moved from the ready to the processing list in one atomic step.
///   There is never an observable instant where it resides in both or neither.
/// - Entries in the processing list are only moved back to the ready list by
///   [`recover`](QueueProvider::recover), which [`dequeue`](QueueProvider::dequeue) runs when it
///   starts, and by [`consume`](QueueProvider::consume) when it is cancelled. This is the only
///   recovery mechanism, there is no visibility timeout.
/// - When deduplication is requested, concurrent enqueues of identical content result in at
///   most one entry until it has been acknowledged as [`Completed`](Acknowledgement::Completed).
///   The hash is only released by the acknowledgement that actually removes the entry.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Pushes a canonical payload (ref [`canonicalize`](super::canonicalize)) onto the ready list
    ///
    /// If `deduplicate` is set and the content hash of the payload is already known,
    /// this is a silent no-op.
    async fn enqueue(&self, queue: &QueueDescriptor, payload: &str, deduplicate: bool)
        -> EmptyResult;

    /// Whether the content hash of a canonical payload is currently registered for the queue
    async fn contains(&self, queue: &QueueDescriptor, payload: &str) -> Result<bool, BoxedError>;

    /// Moves every entry of the processing list back to the consuming end of the ready list
    ///
    /// Returns the number of recovered entries. Entries claimed by consumers which are still
    /// alive are moved as well, thus callers have to make sure this runs before any of their
    /// own claims happen.
    async fn recover(&self, queue: &QueueDescriptor) -> Result<usize, BoxedError>;

    /// Claims entries and passes them to the handler until the cancellation token fires
    ///
    /// Unlike [`dequeue`](QueueProvider::dequeue) this does not recover abandoned entries on
    /// start, which allows multiple loops on the same queue to share a single sweep. Entries
    /// still in the processing list on cancellation are returned to the ready list. Transport
    /// errors encountered while claiming are logged and treated as transient.
    async fn consume(
        &self,
        queue: &QueueDescriptor,
        handler: &dyn EntryHandler,
        cancellation: CancellationToken,
    ) -> EmptyResult;

    /// Recovers abandoned entries and claims new ones until the cancellation token fires
    async fn dequeue(
        &self,
        queue: &QueueDescriptor,
        handler: &dyn EntryHandler,
        cancellation: CancellationToken,
    ) -> EmptyResult {
        self.recover(queue).await?;
        self.consume(queue, handler, cancellation).await
    }

    /// Settles a claimed entry
    async fn acknowledge(&self, entry: &QueueEntry, outcome: Acknowledgement) -> EmptyResult;
}
