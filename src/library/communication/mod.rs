//! Reliable message queueing between services in a distributed system
//!
//! Producers serialize [`Messages`](event::Message) into a named queue held by a backing store.
//! Consumers claim them one at a time per worker and fan each message out to every registered
//! handler. Only once all handlers have finished is the message acknowledged and removed from the
//! store. The guarantees are at-least-once: a claimed message is recorded in a per-queue processing
//! list until it is acknowledged, so a crashed or cancelled consumer never loses it.
//!
//! The module is split into three layers:
//!
//! 1. [`event`] describes the contract between producers, consumers and the backing store
//!    ([`QueueProvider`](event::QueueProvider)).
//! 2. [`dispatch`] contains the [`Producer`](dispatch::Producer) and the [`Consumer`](dispatch::Consumer)
//!    dispatch engine built on top of any provider.
//! 3. [`implementation`] provides concrete providers using third-party crates.

mod error;
mod factory;

pub mod dispatch;
pub mod event;
pub mod implementation;

pub use error::CapturedError;
pub use factory::{ConfigurationError, ProviderKind, ProviderOptions};
