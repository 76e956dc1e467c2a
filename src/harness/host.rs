use super::{DeathReason, Heart};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

/// Named unit of work which can be started and stopped by a [`ServiceHost`]
#[async_trait]
pub trait Service: Send {
    /// Name of the service displayed in log messages
    fn name(&self) -> &str;

    /// Starts the service, returning once it is up and running
    ///
    /// Long-running work has to be moved into background tasks.
    async fn start(&mut self, args: &[String]) -> EmptyResult;

    /// Stops the service and releases its resources
    async fn stop(&mut self) -> EmptyResult;
}

/// Reason why a [`ServiceHost`] has terminated
#[derive(Error, Debug)]
pub enum HostTerminationReason {
    /// A service failed to start
    #[error("service {0} failed to start")]
    StartupFailed(String, #[source] BoxedError),
    /// A service did not start within the startup timeout
    #[error("service {0} did not start in time")]
    Timeout(String),
    /// The [`Heart`] passed to the host died
    #[error("heart died: {0}")]
    HeartDied(DeathReason),
}

/// Runner for a set of [`Service`] implementations
pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
    args: Vec<String>,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            args: Vec::new(),
            startup_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl ServiceHost {
    /// Creates a new host passing the given arguments to every service
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }

    /// Overrides the time each service is given to start and to stop
    pub fn with_timeouts(mut self, startup: Duration, shutdown: Duration) -> Self {
        self.startup_timeout = startup;
        self.shutdown_timeout = shutdown;
        self
    }

    /// Adds a service which will be started after all previously added ones
    pub fn add<S: Service + 'static>(mut self, service: S) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Starts all services in order, waits for the heart to die and stops them in reverse order
    ///
    /// When a service fails to start, the services started before it are stopped right away.
    #[instrument(skip(self, heart))]
    pub async fn run(mut self, mut heart: Heart) -> HostTerminationReason {
        let mut started = 0;
        let mut failure = None;

        for service in self.services.iter_mut() {
            let name = service.name().to_owned();
            info!(service = %name, "Starting service");

            match timeout(self.startup_timeout, service.start(&self.args)).await {
                Ok(Ok(())) => started += 1,
                Ok(Err(error)) => {
                    error!(service = %name, ?error, "Service failed to start");
                    failure = Some(HostTerminationReason::StartupFailed(name, error));
                    break;
                }
                Err(_) => {
                    error!(service = %name, "Service startup timed out");
                    failure = Some(HostTerminationReason::Timeout(name));
                    break;
                }
            }
        }

        let reason = match failure {
            Some(reason) => reason,
            None => {
                debug!("All services started");
                let death_reason = heart.death().await;
                info!(%death_reason, "Heart died");
                HostTerminationReason::HeartDied(death_reason)
            }
        };

        for service in self.services.iter_mut().take(started).rev() {
            info!(service = %service.name(), "Stopping service");

            match timeout(self.shutdown_timeout, service.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => error!(service = %service.name(), ?error, "Service failed to stop"),
                Err(_) => error!(service = %service.name(), "Service shutdown timed out"),
            }
        }

        reason
    }
}
