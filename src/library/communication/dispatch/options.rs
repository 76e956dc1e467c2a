use crate::library::helpers::parse_seconds;
use std::time::Duration;
use structopt::StructOpt;

/// Options controlling the dispatch engine of a [`Consumer`](super::Consumer)
#[derive(Debug, Clone, StructOpt)]
pub struct ConsumerOptions {
    /// Number of workers, each processing one message at a time
    #[structopt(
        long = "consumer-threads",
        env = "CONSUMER_THREADS",
        default_value = "1",
        value_name = "count"
    )]
    pub threads: usize,

    /// Maximum duration of a dispatch before timeout handlers are invoked.
    /// Only applies if timeout handlers have been registered.
    #[structopt(
        long = "dispatch-timeout",
        env = "DISPATCH_TIMEOUT",
        default_value = "120",
        parse(try_from_str = parse_seconds),
        value_name = "seconds"
    )]
    pub timeout: Duration,

    /// Put messages back into the queue when their dispatch times out instead of dropping them
    #[structopt(long)]
    pub retry_on_timeout: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            timeout: Duration::from_secs(120),
            retry_on_timeout: false,
        }
    }
}

impl ConsumerOptions {
    /// Sets the number of workers
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the maximum dispatch duration
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether timed out messages are retried
    pub fn retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }
}

/// Options for a [`Producer`](super::Producer)
#[derive(Debug, Clone, Default, StructOpt)]
pub struct ProducerOptions {
    /// Enqueue messages even if identical content is already waiting in the queue
    #[structopt(long)]
    pub ignore_hash: bool,
}

impl ProducerOptions {
    /// Sets whether deduplication is skipped
    pub fn ignore_hash(mut self, ignore: bool) -> Self {
        self.ignore_hash = ignore;
        self
    }
}
