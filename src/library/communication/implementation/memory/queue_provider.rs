use crate::library::communication::event::{
    annotate, content_hash, refresh, strip, Acknowledgement, EntryHandler, QueueDescriptor,
    QueueEntry, QueueProvider,
};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

#[derive(Default)]
struct QueueState {
    /// Entries awaiting a consumer, pushed at the front and claimed from the back
    ready: VecDeque<String>,
    /// Claimed entries, most recent claim at the front
    processing: VecDeque<String>,
    hashes: HashSet<String>,
}

impl QueueState {
    fn remove_processing(&mut self, record: &str) -> bool {
        match self.processing.iter().position(|r| r == record) {
            Some(index) => self.processing.remove(index).is_some(),
            None => false,
        }
    }

    /// Moves all claimed entries back to the consuming end of the ready list, oldest claim first in line
    fn recover(&mut self) -> usize {
        let count = self.processing.len();

        for record in self.processing.drain(..) {
            self.ready.push_back(record);
        }

        count
    }
}

#[derive(Default)]
struct MemoryQueue {
    state: Mutex<QueueState>,
    wake: Notify,
}

impl MemoryQueue {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the collections half-modified
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn claim(&self) -> Option<String> {
        let mut state = self.state();
        let record = state.ready.pop_back()?;
        state.processing.push_front(record.clone());
        Some(record)
    }
}

/// [`QueueProvider`] implementation storing queues in memory
///
/// Cloning the provider yields a handle to the same set of queues.
#[derive(Clone, Default)]
pub struct MemoryQueueProvider {
    queues: Arc<Mutex<HashMap<QueueDescriptor, Arc<MemoryQueue>>>>,
}

impl MemoryQueueProvider {
    /// Creates a new instance without any queues
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, descriptor: &QueueDescriptor) -> Arc<MemoryQueue> {
        let mut queues = match self.queues.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        queues
            .entry(descriptor.clone())
            .or_insert_with(|| Arc::new(MemoryQueue::default()))
            .clone()
    }

    /// Records currently waiting in the ready list, next to be claimed last
    pub fn ready(&self, queue: &QueueDescriptor) -> Vec<String> {
        self.queue(queue).state().ready.iter().cloned().collect()
    }

    /// Records currently claimed and awaiting acknowledgement
    pub fn processing(&self, queue: &QueueDescriptor) -> Vec<String> {
        self.queue(queue).state().processing.iter().cloned().collect()
    }

    /// Number of content hashes registered for deduplication
    pub fn hash_count(&self, queue: &QueueDescriptor) -> usize {
        self.queue(queue).state().hashes.len()
    }
}

#[async_trait]
impl QueueProvider for MemoryQueueProvider {
    #[instrument(skip(self, payload), fields(queue = %queue))]
    async fn enqueue(
        &self,
        queue: &QueueDescriptor,
        payload: &str,
        deduplicate: bool,
    ) -> EmptyResult {
        let record = annotate(payload, Utc::now())?;
        let store = self.queue(queue);

        {
            let mut state = store.state();

            if deduplicate && !state.hashes.insert(content_hash(payload)) {
                debug!("Skipping duplicate message");
                return Ok(());
            }

            state.ready.push_front(record);
        }

        store.wake.notify_waiters();

        Ok(())
    }

    async fn contains(&self, queue: &QueueDescriptor, payload: &str) -> Result<bool, BoxedError> {
        let hash = content_hash(payload);
        Ok(self.queue(queue).state().hashes.contains(&hash))
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn recover(&self, queue: &QueueDescriptor) -> Result<usize, BoxedError> {
        let store = self.queue(queue);
        let recovered = store.state().recover();

        if recovered > 0 {
            info!(recovered, "Recovered abandoned messages");
            store.wake.notify_waiters();
        }

        Ok(recovered)
    }

    #[instrument(skip(self, handler, cancellation), fields(queue = %queue))]
    async fn consume(
        &self,
        queue: &QueueDescriptor,
        handler: &dyn EntryHandler,
        cancellation: CancellationToken,
    ) -> EmptyResult {
        let store = self.queue(queue);

        loop {
            // Register interest before looking at the list so that no notification slips through
            let notified = store.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancellation.is_cancelled() {
                break;
            }

            match store.claim() {
                Some(record) => {
                    trace!("Claimed message");
                    handler.handle(QueueEntry::new(queue.clone(), record)).await;
                }
                None => {
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        _ = &mut notified => {}
                    }
                }
            }
        }

        let recovered = store.state().recover();
        if recovered > 0 {
            info!(recovered, "Returned in-flight messages to the queue");
            store.wake.notify_waiters();
        }

        Ok(())
    }

    #[instrument(skip(self, entry), fields(queue = %entry.queue()))]
    async fn acknowledge(&self, entry: &QueueEntry, outcome: Acknowledgement) -> EmptyResult {
        let store = self.queue(entry.queue());
        let record = entry.record();
        let mut wake = false;

        {
            let mut state = store.state();

            match outcome {
                Acknowledgement::Completed => {
                    // A recovered copy waiting in the ready list still owns the hash
                    if !state.remove_processing(record) {
                        debug!("Completed message was no longer in flight");
                        return Ok(());
                    }

                    match strip(record) {
                        Ok((canonical, _)) => {
                            state.hashes.remove(&content_hash(&canonical));
                        }
                        Err(error) => warn!(?error, "Unable to release hash of malformed record"),
                    }
                }
                Acknowledgement::Retry => {
                    if state.remove_processing(record) {
                        state.ready.push_front(refresh(record, Utc::now())?);
                        wake = true;
                    }
                }
                Acknowledgement::Withdraw => {
                    if state.remove_processing(record) {
                        state.ready.push_back(record.to_owned());
                        wake = true;
                    }
                }
            }
        }

        if wake {
            store.wake.notify_waiters();
        }

        Ok(())
    }
}
