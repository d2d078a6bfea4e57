//! Shared fakes for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};

use docker_ddns::backend::{ChangeOutcome, DnsBackend};
use docker_ddns::cache::ContainerCache;
use docker_ddns::dispatcher::{Ipv6Rewrite, UpdateDispatcher};
use docker_ddns::error::{BackendError, RuntimeError};
use docker_ddns::event_loop::{Pipeline, WorkerPool};
use docker_ddns::resolver::MetadataResolver;
use docker_ddns::runtime::{ContainerRuntime, RunningContainer};
use docker_ddns::types::{Action, ContainerInspect, ContainerRecord, NetworkEndpoint, RawEvent};

// --- Inspect payloads ---

pub fn inspect(id: &str, hostname: &str, mode: &str, ipv4: &str, ipv6: &str) -> ContainerInspect {
    ContainerInspect {
        id: id.into(),
        name: format!("/{}", hostname),
        hostname: hostname.into(),
        network_mode: mode.into(),
        labels: HashMap::new(),
        networks: vec![(
            "bridge".into(),
            NetworkEndpoint {
                ip_address: Some(ipv4.into()),
                global_ipv6_address: Some(ipv6.into()),
            },
        )],
    }
}

pub fn bridge(id: &str, hostname: &str, ipv4: &str) -> ContainerInspect {
    inspect(id, hostname, "default", ipv4, "")
}

pub fn record(id: &str, hostname: &str, ipv4: &str) -> ContainerRecord {
    ContainerRecord::from_inspect(&bridge(id, hostname, ipv4)).unwrap()
}

pub fn raw(kind: &str, action: &str, id: &str, name: &str) -> RawEvent {
    RawEvent {
        kind: kind.into(),
        action: action.into(),
        id: id.into(),
        name: name.into(),
    }
}

// --- FakeRuntime ---

/// Scripted container runtime.
///
/// Inspect answers are queued per id and consumed one per call; an id with
/// nothing queued is reported as not found. Every call to `events` hands out
/// the next scripted subscription, then an empty stream.
#[derive(Default)]
pub struct FakeRuntime {
    inspects: Mutex<HashMap<String, VecDeque<Result<ContainerInspect, RuntimeError>>>>,
    listings: Mutex<VecDeque<Result<Vec<RunningContainer>, RuntimeError>>>,
    subscriptions: Mutex<VecDeque<Vec<Result<RawEvent, RuntimeError>>>>,
    pub inspect_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inspect(&self, id: &str, result: Result<ContainerInspect, RuntimeError>) {
        self.inspects
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn push_listing(&self, result: Result<Vec<RunningContainer>, RuntimeError>) {
        self.listings.lock().unwrap().push_back(result);
    }

    pub fn push_subscription(&self, events: Vec<Result<RawEvent, RuntimeError>>) {
        self.subscriptions.lock().unwrap().push_back(events);
    }

    pub fn inspect_count(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect(&self, id: &str) -> Result<ContainerInspect, RuntimeError> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        self.inspects
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Err(RuntimeError::NotFound(id.to_string())))
    }

    async fn list_running(&self) -> Result<Vec<RunningContainer>, RuntimeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.listings
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn events(&self) -> BoxStream<'static, Result<RawEvent, RuntimeError>> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let events = self
            .subscriptions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        stream::iter(events).boxed()
    }
}

// --- RecordingBackend ---

/// Backend that records every call and always succeeds.
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<(Action, ContainerRecord)>>,
    pub apply_count: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(Action, ContainerRecord)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.apply_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsBackend for RecordingBackend {
    async fn apply(
        &self,
        action: Action,
        record: &ContainerRecord,
    ) -> Result<ChangeOutcome, BackendError> {
        self.apply_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push((action, record.clone()));
        Ok(ChangeOutcome::Applied)
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

// --- Wiring ---

pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub backend: Arc<RecordingBackend>,
    pub cache: ContainerCache,
    pub resolver: MetadataResolver,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub fn new(rewrite: Option<Ipv6Rewrite>) -> Self {
        Self::with_runtime(Arc::new(FakeRuntime::new()), rewrite)
    }

    pub fn with_runtime(runtime: Arc<FakeRuntime>, rewrite: Option<Ipv6Rewrite>) -> Self {
        let backend = Arc::new(RecordingBackend::new());
        let cache = ContainerCache::new();
        let resolver = MetadataResolver::new(runtime.clone(), cache.clone());
        let pipeline = Arc::new(Pipeline::new(
            resolver.clone(),
            UpdateDispatcher::new(backend.clone(), rewrite),
        ));
        Self {
            runtime,
            backend,
            cache,
            resolver,
            pipeline,
        }
    }

    pub fn pool(&self, workers: usize) -> (WorkerPool, Vec<tokio::task::JoinHandle<()>>) {
        WorkerPool::spawn(self.pipeline.clone(), workers, 4)
    }
}

/// Waits for the workers once every clone of the pool has been dropped.
pub async fn drain(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        handle.await.unwrap();
    }
}
