use super::RedisQueueError;
use crate::library::BoxedError;
use async_trait::async_trait;
use futures::future::FutureExt;
use futures::lock::Mutex;
use futures::stream::{once, BoxStream};
use futures::StreamExt;
use redis::aio::{ConnectionLike, MultiplexedConnection, PubSub};
use redis::{Client, Cmd, Msg, Pipeline, RedisError, RedisFuture, RedisResult, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, instrument, trace, warn};

/// Errors that may occur while listening on a [`PubSubResource`]
#[derive(Error, Debug)]
pub enum PubSubResourceError {
    /// Underlying stream has been closed
    #[error("redis stream has been closed")]
    StreamClosed,
}

/// Wrapper trait for [`PubSub`](redis::aio::PubSub) to allow for black-box implementation
#[async_trait]
pub trait PubSubResource {
    /// Subscribe to a channel by name
    async fn subscribe(&mut self, channel: &str) -> RedisResult<()>;

    /// Listen to subscribed channels for incoming messages
    ///
    /// The stream yields a [`PubSubResourceError::StreamClosed`] as its last item
    /// when the underlying connection goes away.
    fn into_on_message(self) -> BoxStream<'static, Result<Msg, PubSubResourceError>>;
}

/// Factory for redis connections
///
/// Regular commands are sent through a connection that may be shared with other users, while
/// each PubSub subscription receives a dedicated connection.
#[async_trait]
pub trait RedisFactory: Send + Sync {
    /// Type returned for regular commands
    type Connection: ConnectionLike + Send + Sync;
    /// Type returned when creating a PubSub connection
    type PubSub: PubSubResource + Send;

    /// Retrieves the shared connection, establishing it if necessary
    async fn connection(&self) -> Result<Self::Connection, BoxedError>;

    /// Creates a new PubSub connection
    async fn pubsub(&self) -> Result<Self::PubSub, BoxedError>;
}

type SharedConnection = Arc<Mutex<Option<MultiplexedConnection>>>;

/// [`RedisFactory`] implementation based on a [`Client`]
///
/// Holds one lazily established multiplexed connection which is discarded and re-established
/// once a command fails due to connection problems.
pub struct RedisClientFactory {
    client: Client,
    shared: SharedConnection,
    connect_timeout: Duration,
}

impl RedisClientFactory {
    /// Creates a new factory opening connections to the given URL
    ///
    /// No connection is made until one is requested, however, the URL is validated right away.
    pub fn new(url: &str) -> RedisResult<Self> {
        Ok(Self {
            client: Client::open(url)?,
            shared: Arc::new(Mutex::new(None)),
            connect_timeout: Duration::from_secs(4),
        })
    }

    /// Overrides the maximum duration of a connection attempt
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl RedisFactory for RedisClientFactory {
    type Connection = MonitoredConnection;
    type PubSub = RedisPubSub;

    #[instrument(skip(self))]
    async fn connection(&self) -> Result<Self::Connection, BoxedError> {
        let mut shared = self.shared.lock().await;

        let con = match &*shared {
            Some(con) => {
                trace!("Reusing existing shared connection");
                con.clone()
            }
            None => {
                debug!("Establishing shared connection");
                let con = timeout(
                    self.connect_timeout,
                    self.client.get_multiplexed_tokio_connection(),
                )
                .await
                .map_err(|_| RedisQueueError::ConnectTimeout(self.connect_timeout))??;

                *shared = Some(con.clone());
                con
            }
        };

        Ok(MonitoredConnection {
            con,
            shared: self.shared.clone(),
        })
    }

    #[instrument(skip(self))]
    async fn pubsub(&self) -> Result<Self::PubSub, BoxedError> {
        let con = timeout(self.connect_timeout, self.client.get_async_connection())
            .await
            .map_err(|_| RedisQueueError::ConnectTimeout(self.connect_timeout))??;

        Ok(RedisPubSub {
            pubsub: con.into_pubsub(),
        })
    }
}

/// Handle to the shared connection that discards it when it breaks
#[derive(Clone)]
pub struct MonitoredConnection {
    con: MultiplexedConnection,
    shared: SharedConnection,
}

impl MonitoredConnection {
    async fn notify(&self, error: &RedisError) {
        warn!(?error, "Discarding broken redis connection");
        *self.shared.lock().await = None;
    }
}

/// Handle a redis command result.
macro_rules! notify_if_disconnected {
    ($self:expr, $result:expr) => {
        if let Err(ref e) = $result {
            if e.is_connection_dropped()
                || e.is_io_error()
                || e.is_connection_refusal()
                || e.is_timeout()
            {
                $self.notify(e).await;
            }
        }
    };
}

impl ConnectionLike for MonitoredConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        (async move {
            let result = self.con.req_packed_command(cmd).await;
            notify_if_disconnected!(self, result);
            result
        })
        .boxed()
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        (async move {
            let result = self.con.req_packed_commands(cmd, offset, count).await;
            notify_if_disconnected!(self, result);
            result
        })
        .boxed()
    }

    fn get_db(&self) -> i64 {
        self.con.get_db()
    }
}

/// Dedicated PubSub connection
pub struct RedisPubSub {
    pubsub: PubSub,
}

#[async_trait]
impl PubSubResource for RedisPubSub {
    async fn subscribe(&mut self, channel: &str) -> RedisResult<()> {
        self.pubsub.subscribe(channel).await
    }

    fn into_on_message(self) -> BoxStream<'static, Result<Msg, PubSubResourceError>> {
        let message_stream = self
            .pubsub
            .into_on_message()
            .map(Ok::<Msg, PubSubResourceError>);
        let error_stream = once(async { Err(PubSubResourceError::StreamClosed) }).boxed();

        message_stream.chain(error_stream).boxed()
    }
}
