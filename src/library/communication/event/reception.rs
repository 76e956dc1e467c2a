use super::{Acknowledgement, QueueEntry, QueueProvider};
use crate::library::EmptyResult;
use tracing::{debug, instrument};

/// Result of dispatching a received message, as reported by the dispatch engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceptionStatus {
    /// All handlers have finished
    Success,
    /// Handlers did not finish within the configured maximum dispatch duration
    Timeout,
    /// The consumer is shutting down while the message is still in flight
    Withdraw,
}

/// Per-message handle passed from a [`QueueProvider`] into the dispatch engine and back
///
/// Carries the decoded message together with the raw [`QueueEntry`] needed to settle it.
/// Settling consumes the context, thus every claimed message is acknowledged at most once.
#[derive(Debug)]
pub struct ReceptionContext<M> {
    message: M,
    entry: QueueEntry,
    retry_on_timeout: bool,
}

impl<M> ReceptionContext<M> {
    /// Creates a new instance from raw parts
    ///
    /// The `retry_on_timeout` switch determines whether a [`ReceptionStatus::Timeout`] leads
    /// to a retry of the message or drops it like a successfully processed one.
    pub fn new(message: M, entry: QueueEntry, retry_on_timeout: bool) -> Self {
        Self {
            message,
            entry,
            retry_on_timeout,
        }
    }

    /// Decoded message
    pub fn message(&self) -> &M {
        &self.message
    }

    /// Raw entry as claimed from the queue
    pub fn entry(&self) -> &QueueEntry {
        &self.entry
    }

    /// Translates the dispatch result into the [`Acknowledgement`] sent to the provider
    ///
    /// Timeouts are only retried when explicitly enabled to prevent poison messages from
    /// circling through the queue forever.
    pub fn outcome(&self, status: ReceptionStatus) -> Acknowledgement {
        match status {
            ReceptionStatus::Success => Acknowledgement::Completed,
            ReceptionStatus::Timeout if self.retry_on_timeout => Acknowledgement::Retry,
            ReceptionStatus::Timeout => Acknowledgement::Completed,
            ReceptionStatus::Withdraw => Acknowledgement::Withdraw,
        }
    }

    /// Settles the message with the provider it has been claimed from
    #[instrument(skip(self, provider), fields(queue = %self.entry.queue()))]
    pub async fn acknowledge(
        self,
        provider: &dyn QueueProvider,
        status: ReceptionStatus,
    ) -> EmptyResult {
        let outcome = self.outcome(status);
        debug!(?status, %outcome, "Acknowledging message");
        provider.acknowledge(&self.entry, outcome).await
    }
}
