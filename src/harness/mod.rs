//! Runtime harness to host long-running services within a process
//!
//! A [`ServiceHost`] starts a set of named [`Services`](Service), keeps them alive until the
//! [`Heart`] it has been given stops beating, and shuts them down again in reverse order.

mod heart;
mod host;

pub use heart::*;
pub use host::*;
