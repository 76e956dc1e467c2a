//! Trait implementations keeping all state within the current process
//!
//! Queues live in plain collections guarded by a mutex per queue. Idle consumers are woken using
//! [`Notify`](tokio::sync::Notify), which takes the role of the PubSub channel used by networked
//! providers. Since nothing is persisted, the provider only survives the "crash" of a consumer
//! within the same process, which makes it a good fit for tests and embedded use.

mod queue_provider;

pub use queue_provider::*;
