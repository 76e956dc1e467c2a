//! Structures to keep the process alive until some event occurs

use std::fmt;
use std::fmt::{Error as FmtError, Formatter};
use tokio::signal::ctrl_c;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tracing::{debug, error, warn};

/// Reason why the heart stopped beating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathReason {
    /// Internal kill signal has been sent
    Killed(String),
    /// All linked stones have been dropped without sending a kill signal
    Abandoned,
    /// SIGINT, SIGTERM or other process-external cause
    Terminated,
}

impl fmt::Display for DeathReason {
    fn fmt(&self, w: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            DeathReason::Killed(reason) => write!(w, "Killed ({})", reason),
            DeathReason::Abandoned => write!(w, "Abandoned by all heart stones"),
            DeathReason::Terminated => write!(w, "Terminated due to external signal"),
        }
    }
}

/// Lifecycle management struct that can be used to keep the application alive
pub struct Heart {
    /// Receiver for kill signals sent by heart stones
    rx: Receiver<String>,
    /// Whether process signals are observed
    signals: bool,
}

impl Heart {
    /// Creates a new heart which dies on process termination signals, and a linked stone
    pub fn new() -> (Self, HeartStone) {
        Self::internal_new(true)
    }

    /// Creates a new heart that may only be killed through its stone
    pub fn detached() -> (Self, HeartStone) {
        Self::internal_new(false)
    }

    fn internal_new(signals: bool) -> (Self, HeartStone) {
        let (tx, rx) = channel(2);
        (Self { rx, signals }, HeartStone { remote: tx })
    }

    /// Future that waits until the heart dies for the returned reason
    pub async fn death(&mut self) -> DeathReason {
        debug!("Heart starts beating");

        if !self.signals {
            return Self::received(self.rx.recv().await);
        }

        tokio::select! {
            reason = self.rx.recv() => Self::received(reason),
            _ = termination_signal() => DeathReason::Terminated,
        }
    }

    fn received(reason: Option<String>) -> DeathReason {
        match reason {
            Some(reason) => DeathReason::Killed(reason),
            None => DeathReason::Abandoned,
        }
    }
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = ctrl_c() => {},
            }
        }
        Err(error) => {
            warn!(?error, "Unable to listen for SIGTERM, falling back to Ctrl-C only");
            ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    if let Err(error) = ctrl_c().await {
        warn!(?error, "Unable to listen for Ctrl-C");
        futures::future::pending::<()>().await;
    }
}

/// Remote controller for the heart
#[derive(Clone)]
pub struct HeartStone {
    remote: Sender<String>,
}

impl HeartStone {
    /// Kill the associated heart
    pub async fn kill(&self, reason: impl Into<String>) {
        if let Err(e) = self.remote.send(reason.into()).await {
            error!("Failed to interact with Heart: {}", e);
        }
    }
}
