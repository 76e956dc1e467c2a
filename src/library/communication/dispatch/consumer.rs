use super::{ConsumerOptions, DispatchContext};
use crate::library::communication::event::{
    Acknowledgement, EntryHandler, Message, QueueDescriptor, QueueEntry, QueueProvider,
    ReceptionContext, ReceptionStatus,
};
use crate::library::communication::CapturedError;
use crate::library::helpers::Backoff;
use crate::library::EmptyResult;
use async_trait::async_trait;
use futures::future::{join_all, pending, BoxFuture, FutureExt, OptionFuture};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Errors related to the lifecycle of a [`Consumer`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsumerError {
    /// The consumer has been disposed and no longer accepts registrations
    #[error("consumer has been disposed")]
    Disposed,
    /// At least one worker is required
    #[error("thread count has to be at least one")]
    InvalidThreadCount,
    /// Queue names may not be blank
    #[error("queue name may not be blank")]
    InvalidQueueName,
    /// Workers can only be spawned from within a tokio runtime
    #[error("no tokio runtime available to spawn workers on")]
    NoRuntime,
}

/// Future returned by handlers
pub type HandlerFuture = BoxFuture<'static, EmptyResult>;

type Handler<M> = Arc<dyn Fn(Arc<DispatchContext<M>>) -> HandlerFuture + Send + Sync>;

fn boxed_handler<M, F, Fut>(handler: F) -> Handler<M>
where
    F: Fn(Arc<DispatchContext<M>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EmptyResult> + Send + 'static,
{
    Arc::new(move |context| handler(context).boxed())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn snapshot<T: Clone>(list: &RwLock<Vec<T>>) -> Vec<T> {
    list.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn register<T>(list: &RwLock<Vec<T>>, item: T) {
    list.write().unwrap_or_else(PoisonError::into_inner).push(item);
}

fn clear<T>(list: &RwLock<Vec<T>>) {
    list.write().unwrap_or_else(PoisonError::into_inner).clear();
}

/// Handle to a dispatch that has not been acknowledged yet
#[derive(Clone)]
struct InFlight {
    cancellation: CancellationToken,
    /// Held from fan-in until the decision on the outcome has been made
    lock: Arc<tokio::sync::Mutex<()>>,
}

enum FanIn {
    Finished,
    TimedOut,
    Cancelled,
}

struct Shared<M> {
    queue: QueueDescriptor,
    provider: Arc<dyn QueueProvider>,
    options: ConsumerOptions,
    handlers: RwLock<Vec<Handler<M>>>,
    completion_handlers: RwLock<Vec<Handler<M>>>,
    timeout_handlers: RwLock<Vec<Handler<M>>>,
    in_flight: Mutex<HashMap<usize, InFlight>>,
}

impl<M: Message> Shared<M> {
    #[instrument(skip(self, entry, cancellation), fields(queue = %self.queue))]
    async fn dispatch(&self, worker: usize, entry: QueueEntry, cancellation: &CancellationToken) {
        let message = match entry.parse_payload::<M>() {
            Ok(message) => Arc::new(message),
            Err(error) => {
                warn!(?error, record = entry.record(), "Dropping undecodable message");

                if let Err(error) = self
                    .provider
                    .acknowledge(&entry, Acknowledgement::Completed)
                    .await
                {
                    error!(?error, "Unable to acknowledge undecodable message");
                }

                return;
            }
        };

        let token = cancellation.child_token();
        let reception = ReceptionContext::new(message, entry, self.options.retry_on_timeout);
        let context = Arc::new(DispatchContext::new(
            reception.message().clone(),
            token.clone(),
            reception.entry().enqueued_at(),
        ));

        let in_flight = InFlight {
            cancellation: token.clone(),
            lock: Arc::new(tokio::sync::Mutex::new(())),
        };
        lock(&self.in_flight).insert(worker, in_flight.clone());

        let status = self.fan_out(&context).await;

        let status = match status {
            FanIn::Finished => {
                let _guard = in_flight.lock.lock().await;

                if token.is_cancelled() {
                    ReceptionStatus::Withdraw
                } else {
                    trace!("All handlers finished");
                    let completion_handlers = snapshot(&self.completion_handlers);
                    observe(&completion_handlers, &context, "Completion handler failed").await;
                    token.cancel();
                    ReceptionStatus::Success
                }
            }
            FanIn::TimedOut => {
                let _guard = in_flight.lock.lock().await;

                if token.is_cancelled() {
                    ReceptionStatus::Withdraw
                } else {
                    warn!(timeout = ?self.options.timeout, "Dispatch timed out");
                    token.cancel();
                    let timeout_handlers = snapshot(&self.timeout_handlers);
                    observe(&timeout_handlers, &context, "Timeout handler failed").await;
                    ReceptionStatus::Timeout
                }
            }
            FanIn::Cancelled => ReceptionStatus::Withdraw,
        };

        if status == ReceptionStatus::Withdraw {
            info!("Withdrawing message from cancelled dispatch");
        }

        lock(&self.in_flight).remove(&worker);

        if let Err(error) = reception.acknowledge(self.provider.as_ref(), status).await {
            error!(?error, ?status, "Unable to acknowledge message");
        }
    }

    /// Runs all handlers concurrently and waits for them, the timeout or cancellation
    async fn fan_out(&self, context: &Arc<DispatchContext<M>>) -> FanIn {
        let handlers = snapshot(&self.handlers);
        let time_boxed = !snapshot(&self.timeout_handlers).is_empty();
        let timeout = self.options.timeout;

        let tasks = handlers
            .into_iter()
            .map(|handler| {
                let context = context.clone();

                tokio::spawn(async move {
                    if let Err(error) = handler(context.clone()).await {
                        debug!(?error, "Handler failed");
                        context.record_error(CapturedError::from_boxed(error));
                    }
                })
            })
            .collect::<Vec<_>>();

        let fan_in = join_all(tasks).map(|results| {
            for result in results {
                if let Err(error) = result {
                    if error.is_panic() {
                        debug!("Handler panicked");
                        context.record_error(CapturedError::from_panic(error.into_panic()));
                    }
                }
            }
        });

        let deadline = async {
            if time_boxed {
                sleep(timeout).await
            } else {
                pending().await
            }
        };

        tokio::select! {
            _ = fan_in => FanIn::Finished,
            _ = deadline => FanIn::TimedOut,
            _ = context.cancellation().cancelled() => FanIn::Cancelled,
        }
    }
}

/// Runs observers one after another, swallowing their errors and panics
async fn observe<M>(handlers: &[Handler<M>], context: &Arc<DispatchContext<M>>, failure: &str) {
    for handler in handlers {
        let result = AssertUnwindSafe(async { handler(context.clone()).await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(?error, "{}", failure),
            Err(payload) => warn!(error = %CapturedError::from_panic(payload), "{}", failure),
        }
    }
}

struct Worker<M> {
    id: usize,
    shared: Arc<Shared<M>>,
    cancellation: CancellationToken,
}

#[async_trait]
impl<M: Message> EntryHandler for Worker<M> {
    async fn handle(&self, entry: QueueEntry) {
        self.shared
            .dispatch(self.id, entry, &self.cancellation)
            .await;
    }
}

impl<M: Message> Worker<M> {
    #[instrument(skip(self), fields(queue = %self.shared.queue, worker = self.id))]
    async fn run(self) {
        let mut backoff = Backoff::default();
        debug!("Worker started");

        while !self.cancellation.is_cancelled() {
            let result = self
                .shared
                .provider
                .consume(&self.shared.queue, &self, self.cancellation.clone())
                .await;

            if let Err(error) = result {
                error!(?error, "Dequeue failed");

                tokio::select! {
                    _ = self.cancellation.cancelled() => {}
                    _ = sleep(backoff.next().unwrap_or_default()) => {}
                }
            }
        }

        debug!("Worker stopped");
    }
}

/// Recovers abandoned messages once, then runs all workers until cancelled
///
/// Workers only start claiming after the sweep, otherwise a sweep could return the claims of
/// siblings to the queue and have them dispatched twice.
#[instrument(skip(shared, cancellation), fields(queue = %shared.queue))]
async fn supervise<M: Message>(shared: Arc<Shared<M>>, cancellation: CancellationToken) {
    let mut backoff = Backoff::default();

    loop {
        if cancellation.is_cancelled() {
            return;
        }

        match shared.provider.recover(&shared.queue).await {
            Ok(recovered) => {
                debug!(recovered, "Startup recovery finished");
                break;
            }
            Err(error) => {
                error!(?error, "Unable to recover abandoned messages");

                tokio::select! {
                    _ = cancellation.cancelled() => {}
                    _ = sleep(backoff.next().unwrap_or_default()) => {}
                }
            }
        }
    }

    let workers = (0..shared.options.threads)
        .map(|id| {
            let worker = Worker {
                id,
                shared: shared.clone(),
                cancellation: cancellation.child_token(),
            };

            tokio::spawn(worker.run())
        })
        .collect::<Vec<_>>();

    for result in join_all(workers).await {
        if let Err(error) = result {
            warn!(?error, "Worker terminated abnormally");
        }
    }
}

/// Dispatch engine processing messages of one queue
///
/// Workers are started lazily when the first handler is registered. Each worker claims one
/// message at a time, runs all handlers concurrently, waits for them to finish and runs the
/// completion handlers before acknowledging the message. Failing handlers are recorded on the
/// [`DispatchContext`] but do not prevent the message from being completed.
///
/// When timeout handlers are registered, a dispatch that does not finish within the configured
/// timeout is abandoned: its cancellation token fires, the timeout handlers run and the message
/// is either dropped or retried, depending on [`ConsumerOptions::retry_on_timeout`].
pub struct Consumer<M: Message> {
    shared: Arc<Shared<M>>,
    cancellation: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl<M: Message> Consumer<M> {
    /// Creates a consumer for the queue associated with the message type
    pub fn new(
        provider: Arc<dyn QueueProvider>,
        options: ConsumerOptions,
    ) -> Result<Self, ConsumerError> {
        Self::with_queue(M::queue(), provider, options)
    }

    /// Creates a consumer for an explicitly named queue
    pub fn with_queue(
        queue: impl Into<QueueDescriptor>,
        provider: Arc<dyn QueueProvider>,
        options: ConsumerOptions,
    ) -> Result<Self, ConsumerError> {
        let queue = queue.into();

        if !queue.is_valid() {
            return Err(ConsumerError::InvalidQueueName);
        }

        if options.threads == 0 {
            return Err(ConsumerError::InvalidThreadCount);
        }

        Ok(Self {
            shared: Arc::new(Shared {
                queue,
                provider,
                options,
                handlers: RwLock::new(Vec::new()),
                completion_handlers: RwLock::new(Vec::new()),
                timeout_handlers: RwLock::new(Vec::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
            cancellation: CancellationToken::new(),
            supervisor: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    /// Queue this consumer is processing
    pub fn queue(&self) -> &QueueDescriptor {
        &self.shared.queue
    }

    /// Whether [`dispose`](Consumer::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<(), ConsumerError> {
        if self.is_disposed() {
            Err(ConsumerError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Registers a handler which is invoked concurrently with all other handlers for every message
    ///
    /// The first registration starts the workers, thus it has to happen within a tokio runtime.
    pub fn receive<F, Fut>(&self, handler: F) -> Result<&Self, ConsumerError>
    where
        F: Fn(Arc<DispatchContext<M>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EmptyResult> + Send + 'static,
    {
        self.ensure_active()?;

        let mut supervisor = lock(&self.supervisor);

        if supervisor.is_none() {
            let runtime = Handle::try_current().map_err(|_| ConsumerError::NoRuntime)?;
            register(&self.shared.handlers, boxed_handler(handler));

            debug!(queue = %self.shared.queue, threads = self.shared.options.threads, "Starting workers");

            *supervisor = Some(runtime.spawn(supervise(
                self.shared.clone(),
                self.cancellation.child_token(),
            )));
        } else {
            register(&self.shared.handlers, boxed_handler(handler));
        }

        Ok(self)
    }

    /// Registers a handler which runs after all handlers have finished processing a message
    ///
    /// Completion handlers run sequentially in the order of registration, before the message is
    /// acknowledged. Their errors are logged and otherwise ignored.
    pub fn complete<F, Fut>(&self, handler: F) -> Result<&Self, ConsumerError>
    where
        F: Fn(Arc<DispatchContext<M>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EmptyResult> + Send + 'static,
    {
        self.ensure_active()?;
        register(&self.shared.completion_handlers, boxed_handler(handler));
        Ok(self)
    }

    /// Registers a handler which runs when the handlers of a message exceed the configured timeout
    ///
    /// Registering at least one of these enables the timeout. Timeout handlers run sequentially,
    /// their errors are logged and otherwise ignored.
    pub fn on_timeout<F, Fut>(&self, handler: F) -> Result<&Self, ConsumerError>
    where
        F: Fn(Arc<DispatchContext<M>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EmptyResult> + Send + 'static,
    {
        self.ensure_active()?;
        register(&self.shared.timeout_handlers, boxed_handler(handler));
        Ok(self)
    }

    /// Stops all workers and waits for them to return their messages to the queue
    ///
    /// Messages which are currently being dispatched are withdrawn, unless their dispatch is
    /// already past the point of no return, in which case this waits for it to conclude.
    /// Calling this more than once has no effect.
    #[instrument(skip(self), fields(queue = %self.shared.queue))]
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let in_flight = lock(&self.shared.in_flight)
            .values()
            .cloned()
            .collect::<Vec<_>>();

        for dispatch in in_flight {
            let _guard = dispatch.lock.lock().await;
            dispatch.cancellation.cancel();
        }

        self.cancellation.cancel();

        let supervisor = lock(&self.supervisor).take();
        if let Some(Err(error)) = OptionFuture::from(supervisor).await {
            warn!(?error, "Workers terminated abnormally");
        }

        clear(&self.shared.handlers);
        clear(&self.shared.completion_handlers);
        clear(&self.shared.timeout_handlers);

        info!("Consumer disposed");
    }
}

impl<M: Message> Drop for Consumer<M> {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::event::canonicalize;
    use crate::library::communication::implementation::memory::MemoryQueueProvider;
    use crate::library::BoxedError;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SampleMessage {
        text: String,
    }

    impl Message for SampleMessage {
        fn queue() -> QueueDescriptor {
            QueueDescriptor::new("TestQueue")
        }
    }

    fn explode() -> EmptyResult {
        panic!("handler exploded")
    }

    fn sample(text: &str) -> SampleMessage {
        SampleMessage { text: text.into() }
    }

    async fn send(provider: &MemoryQueueProvider, message: &SampleMessage) {
        let payload = canonicalize(message).unwrap();
        provider
            .enqueue(&SampleMessage::queue(), &payload, true)
            .await
            .unwrap();
    }

    fn consumer(provider: &MemoryQueueProvider, options: ConsumerOptions) -> Consumer<SampleMessage> {
        Consumer::new(Arc::new(provider.clone()), options).unwrap()
    }

    async fn wait_until_empty(provider: &MemoryQueueProvider) {
        let queue = SampleMessage::queue();

        timeout(TIMEOUT, async {
            while !provider.ready(&queue).is_empty() || !provider.processing(&queue).is_empty() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn reject_invalid_construction_parameters() {
        let provider: Arc<dyn QueueProvider> = Arc::new(MemoryQueueProvider::new());

        assert_eq!(
            Consumer::<SampleMessage>::new(provider.clone(), ConsumerOptions::default().threads(0))
                .err(),
            Some(ConsumerError::InvalidThreadCount)
        );
        assert_eq!(
            Consumer::<SampleMessage>::with_queue("  ", provider, ConsumerOptions::default())
                .err(),
            Some(ConsumerError::InvalidQueueName)
        );
    }

    #[test]
    fn require_runtime_to_start_workers() {
        let consumer = consumer(&MemoryQueueProvider::new(), ConsumerOptions::default());

        assert_eq!(
            consumer.receive(|_| async { Ok(()) }).err(),
            Some(ConsumerError::NoRuntime)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn run_completion_handlers_after_all_handlers() {
        let provider = MemoryQueueProvider::new();
        let consumer = consumer(&provider, ConsumerOptions::default());
        let (tx, mut rx) = mpsc::unbounded_channel::<(&'static str, String)>();

        let slow = tx.clone();
        let fast = tx.clone();
        let done = tx;

        consumer
            .receive(move |context| {
                let tx = slow.clone();
                async move {
                    sleep(Duration::from_millis(300)).await;
                    tx.send(("slow", context.message().text.clone())).ok();
                    Ok(())
                }
            })
            .unwrap()
            .receive(move |context| {
                let tx = fast.clone();
                async move {
                    sleep(Duration::from_millis(100)).await;
                    tx.send(("fast", context.message().text.clone())).ok();
                    Ok(())
                }
            })
            .unwrap()
            .complete(move |context| {
                let tx = done.clone();
                async move {
                    tx.send(("complete", context.message().text.clone())).ok();
                    Ok(())
                }
            })
            .unwrap();

        send(&provider, &sample("m1")).await;

        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap());
        }

        assert_eq!(
            events,
            vec![
                ("fast", "m1".to_string()),
                ("slow", "m1".to_string()),
                ("complete", "m1".to_string()),
            ]
        );

        wait_until_empty(&provider).await;
        assert_eq!(provider.hash_count(&SampleMessage::queue()), 0);

        consumer.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn collect_errors_of_failing_handlers() {
        let provider = MemoryQueueProvider::new();
        let consumer = consumer(&provider, ConsumerOptions::default());
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<CapturedError>>();
        let invocations = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = invocations.clone();
        consumer
            .receive(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), BoxedError>("handler failed".into())
                }
            })
            .unwrap();

        let counter = invocations.clone();
        consumer
            .receive(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    explode()
                }
            })
            .unwrap();

        let counter = invocations.clone();
        consumer
            .receive(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap()
            .complete(move |context| {
                let tx = tx.clone();
                async move {
                    tx.send(context.errors()).ok();
                    Err::<(), BoxedError>("completion handlers may fail too".into())
                }
            })
            .unwrap();

        send(&provider, &sample("m1")).await;

        let errors = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        let mut messages = errors
            .iter()
            .filter_map(|e| e.message().map(str::to_owned))
            .collect::<Vec<_>>();
        messages.sort();

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(
            messages,
            vec![
                "handler failed".to_string(),
                "handler panicked: handler exploded".to_string()
            ]
        );

        // Failing handlers do not prevent completion
        wait_until_empty(&provider).await;
        consumer.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn acknowledge_only_after_slowest_handler() {
        let provider = MemoryQueueProvider::new();
        let consumer = consumer(&provider, ConsumerOptions::default());
        let queue = SampleMessage::queue();

        consumer
            .receive(|_| async {
                sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .unwrap()
            .receive(|_| async {
                sleep(Duration::from_millis(400)).await;
                Ok(())
            })
            .unwrap();

        let start = Instant::now();
        send(&provider, &sample("m1")).await;

        timeout(TIMEOUT, async {
            while provider.processing(&queue).is_empty() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        wait_until_empty(&provider).await;
        assert!(start.elapsed() >= Duration::from_millis(400));

        consumer.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn withdraw_messages_on_dispose() {
        let provider = MemoryQueueProvider::new();
        let consumer = consumer(&provider, ConsumerOptions::default());
        let queue = SampleMessage::queue();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let completed = Arc::new(AtomicBool::new(false));

        consumer
            .receive(move |context| {
                let tx = tx.clone();
                async move {
                    tx.send(()).ok();
                    context.cancellation().cancelled().await;
                    Ok(())
                }
            })
            .unwrap();

        let flag = completed.clone();
        consumer
            .complete(move |_| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        send(&provider, &sample("m1")).await;
        timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();

        consumer.dispose().await;

        assert!(!completed.load(Ordering::SeqCst));
        assert_eq!(provider.ready(&queue).len(), 1);
        assert!(provider.processing(&queue).is_empty());
        assert!(provider.contains(&queue, &canonicalize(&sample("m1")).unwrap()).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reject_registrations_after_dispose() {
        let provider = MemoryQueueProvider::new();
        let consumer = consumer(&provider, ConsumerOptions::default());

        consumer.receive(|_| async { Ok(()) }).unwrap();
        consumer.dispose().await;
        consumer.dispose().await;

        assert!(consumer.is_disposed());
        assert_eq!(
            consumer.receive(|_| async { Ok(()) }).err(),
            Some(ConsumerError::Disposed)
        );
        assert_eq!(
            consumer.complete(|_| async { Ok(()) }).err(),
            Some(ConsumerError::Disposed)
        );
        assert_eq!(
            consumer.on_timeout(|_| async { Ok(()) }).err(),
            Some(ConsumerError::Disposed)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drop_timed_out_messages_by_default() {
        let provider = MemoryQueueProvider::new();
        let options = ConsumerOptions::default().timeout(Duration::from_millis(100));
        let consumer = consumer(&provider, options);
        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        let completed = Arc::new(AtomicBool::new(false));

        consumer
            .receive(|context| async move {
                tokio::select! {
                    _ = context.cancellation().cancelled() => {}
                    _ = sleep(Duration::from_secs(30)) => {}
                }
                Ok(())
            })
            .unwrap()
            .on_timeout(move |context| {
                let tx = tx.clone();
                async move {
                    tx.send(context.is_cancelled()).ok();
                    Ok(())
                }
            })
            .unwrap();

        let flag = completed.clone();
        consumer
            .complete(move |_| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        send(&provider, &sample("m1")).await;

        let cancelled = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert!(cancelled);

        wait_until_empty(&provider).await;
        assert!(!completed.load(Ordering::SeqCst));
        assert_eq!(provider.hash_count(&SampleMessage::queue()), 0);

        consumer.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retry_timed_out_messages_when_enabled() {
        let provider = MemoryQueueProvider::new();
        let options = ConsumerOptions::default()
            .timeout(Duration::from_millis(100))
            .retry_on_timeout(true);
        let consumer = consumer(&provider, options);
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = attempts.clone();
        consumer
            .receive(move |context| {
                let counter = counter.clone();
                async move {
                    // Only the first attempt stalls
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        context.cancellation().cancelled().await;
                    }
                    Ok(())
                }
            })
            .unwrap()
            .on_timeout(|_| async { Ok(()) })
            .unwrap()
            .complete(move |_| {
                let tx = tx.clone();
                async move {
                    tx.send(()).ok();
                    Ok(())
                }
            })
            .unwrap();

        send(&provider, &sample("m1")).await;

        timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        wait_until_empty(&provider).await;
        consumer.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn acknowledge_undecodable_messages() {
        let provider = MemoryQueueProvider::new();
        let queue = SampleMessage::queue();
        let consumer = consumer(&provider, ConsumerOptions::default());
        let invoked = Arc::new(AtomicBool::new(false));

        let flag = invoked.clone();
        consumer
            .receive(move |_| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        provider
            .enqueue(&queue, r#"{"unexpected":1}"#, false)
            .await
            .unwrap();

        wait_until_empty(&provider).await;
        assert!(!invoked.load(Ordering::SeqCst));

        consumer.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn process_messages_in_parallel_with_multiple_threads() {
        let provider = MemoryQueueProvider::new();
        let consumer = consumer(&provider, ConsumerOptions::default().threads(3));
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        consumer
            .receive(move |context| {
                let tx = tx.clone();
                async move {
                    sleep(Duration::from_millis(300)).await;
                    tx.send(context.message().text.clone()).ok();
                    Ok(())
                }
            })
            .unwrap();

        let start = Instant::now();
        for text in &["a", "b", "c"] {
            send(&provider, &sample(text)).await;
        }

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap());
        }
        received.sort();

        assert_eq!(received, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert!(start.elapsed() < Duration::from_millis(850));

        consumer.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dispatch_waiting_messages_once_with_multiple_threads() {
        let provider = MemoryQueueProvider::new();
        let queue = SampleMessage::queue();
        let invocations = Arc::new(Mutex::new(Vec::new()));

        for text in &["a", "b"] {
            send(&provider, &sample(text)).await;
        }

        let consumer = consumer(&provider, ConsumerOptions::default().threads(4));
        let log = invocations.clone();
        consumer
            .receive(move |context| {
                let log = log.clone();
                async move {
                    lock(&log).push(context.message().text.clone());
                    sleep(Duration::from_millis(100)).await;
                    Ok(())
                }
            })
            .unwrap();

        wait_until_empty(&provider).await;
        // Give duplicate dispatches a chance to show up
        sleep(Duration::from_millis(300)).await;
        consumer.dispose().await;

        let mut invocations = lock(&invocations).clone();
        invocations.sort();

        assert_eq!(invocations, vec!["a".to_string(), "b".to_string()]);
        assert!(provider.ready(&queue).is_empty());
        assert!(provider.processing(&queue).is_empty());
        assert_eq!(provider.hash_count(&queue), 0);
    }
}
