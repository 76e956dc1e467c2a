use crate::library::communication::CapturedError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// State shared by all handlers processing one message
///
/// Created once per claimed message and passed to every handler, completion handler and
/// timeout handler registered at the time of the claim.
#[derive(Debug)]
pub struct DispatchContext<M> {
    message: Arc<M>,
    cancellation: CancellationToken,
    enqueued_at: Option<DateTime<Utc>>,
    errors: Mutex<Vec<CapturedError>>,
}

impl<M> DispatchContext<M> {
    pub(crate) fn new(
        message: Arc<M>,
        cancellation: CancellationToken,
        enqueued_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            message,
            cancellation,
            enqueued_at,
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Message being processed
    pub fn message(&self) -> &M {
        &self.message
    }

    /// Token which fires when the dispatch has been concluded, timed out, or the consumer shuts down
    ///
    /// Handlers are not aborted when it fires, they are expected to check it and stop on their own.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Shorthand for `cancellation().is_cancelled()`
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Point in time at which the message has last been enqueued
    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.enqueued_at
    }

    /// Errors returned by handlers that have finished so far
    pub fn errors(&self) -> Vec<CapturedError> {
        match self.errors.lock() {
            Ok(errors) => errors.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn record_error(&self, error: CapturedError) {
        match self.errors.lock() {
            Ok(mut errors) => errors.push(error),
            Err(poisoned) => poisoned.into_inner().push(error),
        }
    }
}
