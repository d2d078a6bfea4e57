//! Event consumption and the worker pool behind it.
//!
//! The event loop reads the runtime's event stream one entry at a time and
//! hands every container `start`/`die` to a [`WorkerPool`]. The pool is a set
//! of shards, each a bounded queue drained by one task; a container id always
//! maps to the same shard, so events for one container are handled in the
//! order they arrived while different containers proceed in parallel. A full
//! shard makes the loop wait, which bounds outbound connections under bursts.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::dispatcher::UpdateDispatcher;
use crate::resolver::MetadataResolver;
use crate::runtime::ContainerRuntime;
use crate::types::LifecycleEvent;

/// Delay before re-subscribing after the event stream ends.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Resolution followed by dispatch: one unit of work per event.
pub struct Pipeline {
    resolver: MetadataResolver,
    dispatcher: UpdateDispatcher,
}

impl Pipeline {
    pub fn new(resolver: MetadataResolver, dispatcher: UpdateDispatcher) -> Self {
        Self {
            resolver,
            dispatcher,
        }
    }

    pub async fn handle(&self, event: LifecycleEvent) {
        if let Some(record) = self.resolver.resolve(&event).await {
            self.dispatcher.dispatch(event.action, record).await;
        }
    }
}

/// The pool is gone; no further events can be handled.
#[derive(Debug, thiserror::Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

#[derive(Clone)]
pub struct WorkerPool {
    shards: Arc<Vec<mpsc::Sender<LifecycleEvent>>>,
}

impl WorkerPool {
    /// Start `workers` shards with room for `depth` queued events each.
    ///
    /// The returned handles finish once every clone of the pool is dropped
    /// and the queues are drained.
    pub fn spawn(
        pipeline: Arc<Pipeline>,
        workers: usize,
        depth: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let mut shards = Vec::with_capacity(workers.max(1));
        let mut handles = Vec::with_capacity(workers.max(1));
        for shard in 0..workers.max(1) {
            let (tx, mut rx) = mpsc::channel::<LifecycleEvent>(depth.max(1));
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    debug!(
                        "Worker {} handling {} of {}",
                        shard,
                        event.action,
                        event.label()
                    );
                    pipeline.handle(event).await;
                }
            }));
            shards.push(tx);
        }
        (
            Self {
                shards: Arc::new(shards),
            },
            handles,
        )
    }

    fn shard_for(&self, id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Queue `event`, waiting while its shard is full.
    pub async fn submit(&self, event: LifecycleEvent) -> Result<(), PoolClosed> {
        let shard = self.shard_for(&event.container_id);
        self.shards[shard].send(event).await.map_err(|_| PoolClosed)
    }
}

pub struct EventLoop {
    runtime: Arc<dyn ContainerRuntime>,
    pool: WorkerPool,
    reconnect_delay: Duration,
}

impl EventLoop {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, pool: WorkerPool) -> Self {
        Self {
            runtime,
            pool,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }

    /// Consume one subscription until the stream ends or fails.
    pub async fn run_once(&self) -> Result<(), PoolClosed> {
        let mut stream = self.runtime.events();
        info!("Listening for Docker events...");
        while let Some(item) = stream.next().await {
            match item {
                Ok(raw) => {
                    let Some(event) = LifecycleEvent::from_raw(&raw) else {
                        continue;
                    };
                    info!("[{}] Container {}", event.label(), event.action);
                    self.pool.submit(event).await?;
                }
                Err(err) => {
                    error!("Error in Docker event stream: {}", err);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Consume events for as long as the pool accepts them, re-subscribing
    /// whenever the stream drops.
    pub async fn run(&self) {
        loop {
            if let Err(err) = self.run_once().await {
                error!("Event loop stopping: {}", err);
                return;
            }
            warn!(
                "Docker event stream ended. Reconnecting in {}s...",
                self.reconnect_delay.as_secs()
            );
            sleep(self.reconnect_delay).await;
        }
    }
}
