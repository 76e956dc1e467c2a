//! Selection of a [`QueueProvider`] by name
//!
//! The set of providers is closed, thus selection happens through the [`ProviderKind`] enum
//! instead of a registry. Options can be flattened into the options of other programs.

use super::event::QueueProvider;
use super::implementation::memory::MemoryQueueProvider;
use super::implementation::redis::{RedisClientFactory, RedisQueueProvider};
use crate::library::helpers::parse_seconds;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use thiserror::Error;
use tracing::info;

/// Errors that prevent a provider from being constructed
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The requested provider name is not known
    #[error("unknown queue provider '{0}', expected one of: redis, memory")]
    UnknownProvider(String),
    /// The provider requires a connection string which has not been set
    #[error("queue provider '{0}' requires a connection url")]
    MissingConnection(ProviderKind),
    /// The connection string has been rejected
    #[error("invalid connection url for queue provider '{0}'")]
    InvalidConnection(ProviderKind, #[source] redis::RedisError),
}

/// Available [`QueueProvider`] implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Lists in a redis database, ref [`RedisQueueProvider`]
    Redis,
    /// Collections in process memory, ref [`MemoryQueueProvider`]
    Memory,
}

impl FromStr for ProviderKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(ProviderKind::Redis),
            "memory" => Ok(ProviderKind::Memory),
            _ => Err(ConfigurationError::UnknownProvider(s.to_owned())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Redis => write!(f, "redis"),
            ProviderKind::Memory => write!(f, "memory"),
        }
    }
}

/// Options for selecting and connecting a [`QueueProvider`]
#[derive(Debug, Clone, StructOpt)]
pub struct ProviderOptions {
    /// Queue provider implementation (redis or memory)
    #[structopt(
        long = "queue-provider",
        env = "QUEUE_PROVIDER",
        default_value = "redis",
        value_name = "name"
    )]
    pub provider: ProviderKind,

    /// Redis database server URL
    #[structopt(short = "r", long = "redis", env = "REDIS", value_name = "url")]
    pub redis: Option<String>,

    /// Interval after which idle consumers re-check a queue, in case a wake-up got lost
    #[structopt(
        long,
        env,
        default_value = "30",
        parse(try_from_str = parse_seconds),
        value_name = "seconds"
    )]
    pub idle_poll_interval: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Redis,
            redis: None,
            idle_poll_interval: Duration::from_secs(30),
        }
    }
}

impl ProviderOptions {
    /// Options for the in-memory provider
    pub fn memory() -> Self {
        Self {
            provider: ProviderKind::Memory,
            ..Default::default()
        }
    }

    /// Options for the redis provider connecting to the given URL
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Redis,
            redis: Some(url.into()),
            ..Default::default()
        }
    }

    /// Instantiates the selected provider
    ///
    /// Connections are established lazily, thus this only fails on configuration errors.
    /// Each call to this function yields an independent provider; in the case of the in-memory
    /// provider that means a separate set of queues.
    pub fn build(&self) -> Result<Arc<dyn QueueProvider>, ConfigurationError> {
        info!(provider = %self.provider, "Creating queue provider");

        match self.provider {
            ProviderKind::Memory => Ok(Arc::new(MemoryQueueProvider::new())),
            ProviderKind::Redis => {
                let url = self
                    .redis
                    .as_deref()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(ConfigurationError::MissingConnection(ProviderKind::Redis))?;

                let factory = RedisClientFactory::new(url)
                    .map_err(|e| ConfigurationError::InvalidConnection(ProviderKind::Redis, e))?;

                Ok(Arc::new(
                    RedisQueueProvider::new(factory).with_idle_poll(self.idle_poll_interval),
                ))
            }
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn parse_provider_names_case_insensitively() {
        assert_eq!("Redis".parse::<ProviderKind>().unwrap(), ProviderKind::Redis);
        assert_eq!("MEMORY".parse::<ProviderKind>().unwrap(), ProviderKind::Memory);
    }

    #[test]
    fn reject_unknown_provider_names() {
        assert!(matches!(
            "sqs".parse::<ProviderKind>(),
            Err(ConfigurationError::UnknownProvider(name)) if name == "sqs"
        ));
    }

    #[test]
    fn require_redis_url() {
        let options = ProviderOptions::default();

        assert!(matches!(
            options.build(),
            Err(ConfigurationError::MissingConnection(ProviderKind::Redis))
        ));
    }

    #[test]
    fn reject_malformed_redis_url() {
        let options = ProviderOptions::redis("not a url");

        assert!(matches!(
            options.build(),
            Err(ConfigurationError::InvalidConnection(ProviderKind::Redis, _))
        ));
    }

    #[test]
    fn build_without_connecting() {
        assert!(ProviderOptions::redis("redis://localhost:1/").build().is_ok());
        assert!(ProviderOptions::memory().build().is_ok());
    }

    #[test]
    fn read_options_from_arguments() {
        let options = ProviderOptions::from_iter_safe(&[
            "test",
            "--queue-provider",
            "memory",
            "--idle-poll-interval",
            "5",
        ])
        .unwrap();

        assert_eq!(options.provider, ProviderKind::Memory);
        assert_eq!(options.idle_poll_interval, std::time::Duration::from_secs(5));
    }
}
