//! Typed producers and consumers on top of a [`QueueProvider`](super::event::QueueProvider)
//!
//! A [`Consumer`] runs a pool of workers which each claim one message at a time, fan it out to
//! every registered handler concurrently and acknowledge it once all of them have finished.
//! Handler results are collected on the shared [`DispatchContext`] so that completion handlers
//! may inspect them.
//!
//! ```no_run
//! # use quay::library::communication::dispatch::*;
//! # use quay::library::communication::event::Message;
//! # use quay::library::communication::ProviderOptions;
//! # use serde::{Deserialize, Serialize};
//! #[derive(Serialize, Deserialize)]
//! struct Greeting { text: String }
//!
//! impl Message for Greeting {}
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let provider = ProviderOptions::memory().build()?;
//!
//! let consumer = Consumer::<Greeting>::new(provider.clone(), ConsumerOptions::default())?;
//! consumer
//!     .receive(|context| async move {
//!         println!("{}", context.message().text);
//!         Ok(())
//!     })?
//!     .complete(|context| async move {
//!         println!("{} handler(s) failed", context.errors().len());
//!         Ok(())
//!     })?;
//!
//! let producer = Producer::new(provider, ProducerOptions::default());
//! producer.send(&Greeting { text: "hello".into() }).await?;
//! # consumer.dispose().await;
//! # Ok(())
//! # }
//! ```

mod consumer;
mod context;
mod options;
mod producer;

pub use consumer::*;
pub use context::*;
pub use options::*;
pub use producer::*;
