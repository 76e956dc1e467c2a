//! Contract between producers, consumers and the backing store
//!
//! Every [`Message`] type is bound to exactly one queue, described by a [`QueueDescriptor`].
//! A [`QueueProvider`] stores serialized messages in that queue and hands them out again
//! as [`QueueEntries`](QueueEntry) while keeping a record of every claimed entry in a
//! processing list. Only an explicit [`Acknowledgement`] removes an entry for good.
//!
//! On the consumer side, entries are decoded and wrapped into a [`ReceptionContext`] which
//! is threaded through the dispatch engine. It is consumed by exactly one call to
//! [`acknowledge`](ReceptionContext::acknowledge), making it impossible to settle a
//! message twice.

mod entry;
mod message;
mod queue;
mod queue_provider;
mod reception;

pub use entry::*;
pub use message::*;
pub use queue::*;
pub use queue_provider::*;
pub use reception::*;
