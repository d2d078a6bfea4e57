//! Turns a lifecycle event into a [`ContainerRecord`].
//!
//! The live inspect is authoritative on `start`. On `die` the container has
//! usually lost its addresses or is already gone, so the snapshot cached at
//! start time is preferred and consumed. When the runtime is slow the cache
//! is used as well; without a cached snapshot the inspect is retried once.

use std::sync::Arc;

use log::{debug, error, warn};

use crate::cache::ContainerCache;
use crate::error::RuntimeError;
use crate::runtime::ContainerRuntime;
use crate::types::{Action, ContainerRecord, LifecycleEvent};

/// Extra inspect attempts after a runtime timeout.
pub const TIMEOUT_RETRIES: usize = 1;

#[derive(Clone)]
pub struct MetadataResolver {
    runtime: Arc<dyn ContainerRuntime>,
    cache: ContainerCache,
}

impl MetadataResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, cache: ContainerCache) -> Self {
        Self { runtime, cache }
    }

    /// `die` consumes the cached snapshot, anything else only reads it.
    async fn from_cache(&self, event: &LifecycleEvent) -> Option<ContainerRecord> {
        match event.action {
            Action::Die => self.cache.pop(&event.container_id).await,
            Action::Start => self.cache.get(&event.container_id).await,
        }
    }

    /// Resolve `event`, or `None` when it has to be dropped.
    pub async fn resolve(&self, event: &LifecycleEvent) -> Option<ContainerRecord> {
        let name = event.label();
        let mut attempt = 0;
        loop {
            match self.runtime.inspect(&event.container_id).await {
                Ok(inspect) => {
                    let cached = match event.action {
                        Action::Die => self.cache.pop(&event.container_id).await,
                        Action::Start => None,
                    };
                    let live = match ContainerRecord::from_inspect(&inspect) {
                        Ok(record) => record,
                        Err(topology) => {
                            debug!("[{}] Dropping {} event: {}", name, event.action, topology);
                            return None;
                        }
                    };
                    if let Some(cached) = cached {
                        debug!("[{}] Using cache for {}", name, cached.hostname);
                        return Some(cached);
                    }
                    if event.action == Action::Start {
                        debug!(
                            "[{}] Caching {} with ipv4 {:?}",
                            name, live.hostname, live.ipv4
                        );
                        self.cache.put(&event.container_id, live.clone()).await;
                    }
                    return Some(live);
                }
                Err(RuntimeError::NotFound(_)) => {
                    warn!(
                        "[{}] Container not found, probably exited before processing",
                        name
                    );
                    return match self.from_cache(event).await {
                        Some(record) => {
                            warn!("[{}] Information found in cache", name);
                            Some(record)
                        }
                        None => {
                            warn!("[{}] Information not found in cache, skipping", name);
                            None
                        }
                    };
                }
                Err(RuntimeError::Timeout(secs)) => {
                    error!(
                        "[{}] Timeout after {}s requesting information from docker ({})",
                        name, secs, event.action
                    );
                    if let Some(record) = self.from_cache(event).await {
                        debug!("[{}] Got information from cache", name);
                        return Some(record);
                    }
                    if attempt >= TIMEOUT_RETRIES {
                        error!("[{}] Not in cache and out of retries, dropping event", name);
                        return None;
                    }
                    attempt += 1;
                    debug!("[{}] Trying to get information again from docker", name);
                }
                Err(err) => {
                    error!("[{}] Error requesting information from docker: {}", name, err);
                    return None;
                }
            }
        }
    }
}
