//! Converges DNS with the containers already running at boot.
//!
//! Every running container is fed to the worker pool as a synthetic `start`,
//! which also seeds the cache for its eventual `die`. Containers that die
//! while the daemon is down are not cleaned up.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::time::sleep;

use crate::error::RuntimeError;
use crate::event_loop::WorkerPool;
use crate::runtime::{ContainerRuntime, RunningContainer};
use crate::types::LifecycleEvent;

/// Wait before listing again after a runtime timeout.
pub const RETRY_DELAY: Duration = Duration::from_secs(15);

pub struct StartupReconciler {
    runtime: Arc<dyn ContainerRuntime>,
    pool: WorkerPool,
    retry_delay: Duration,
}

impl StartupReconciler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, pool: WorkerPool) -> Self {
        Self {
            runtime,
            pool,
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// List running containers, retrying once after a timeout.
    async fn list(&self) -> Result<Vec<RunningContainer>, RuntimeError> {
        match self.runtime.list_running().await {
            Err(RuntimeError::Timeout(secs)) => {
                error!(
                    "Timeout after {}s listing containers, retrying in {}s",
                    secs,
                    self.retry_delay.as_secs()
                );
                sleep(self.retry_delay).await;
                self.runtime.list_running().await
            }
            other => other,
        }
    }

    /// Queue a `start` for every running container and return how many were queued.
    pub async fn run(&self) -> usize {
        info!("Checking running containers and updating DNS");
        let containers = match self.list().await {
            Ok(containers) => containers,
            Err(err) => {
                error!("Startup pass aborted: {}", err);
                return 0;
            }
        };

        let mut queued = 0;
        for container in containers {
            if self
                .pool
                .submit(LifecycleEvent::start(container.id, container.name))
                .await
                .is_err()
            {
                error!("Worker pool closed during startup pass");
                break;
            }
            queued += 1;
        }
        info!("Finished startup pass, {} containers queued", queued);
        queued
    }
}
