//! Implementations of the [`QueueProvider`](super::event::QueueProvider) trait
//!
//! - [`redis`] stores queues in Redis lists and wakes idle consumers using PubSub channels
//! - [`memory`] keeps everything within the current process, e.g. for tests or single-process deployments

pub mod memory;
pub mod redis;
