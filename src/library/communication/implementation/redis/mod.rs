//! Trait implementations using [`redis`](::redis)
//!
//! Every queue is made up of the following keys:
//!
//! | Key                  | Type    | Contents                                     |
//! |----------------------|---------|----------------------------------------------|
//! | `<queue>`            | List    | Ready records, pushed left and popped right  |
//! | `<queue>.processing` | List    | Records claimed by a consumer                |
//! | `<queue>.hash`       | Hash    | Content hashes of deduplicated records       |
//! | `<queue>.wake`       | Channel | Notifications sent whenever records are added |

use std::time::Duration;
use thiserror::Error;

mod factory;
mod queue_provider;
mod scripts;

pub use factory::*;
pub use queue_provider::*;

/// Errors that may occur while talking to redis
#[derive(Debug, Error)]
pub enum RedisQueueError {
    /// Establishing a connection took longer than permitted
    #[error("timed out connecting to redis after {0:?}")]
    ConnectTimeout(Duration),
}
