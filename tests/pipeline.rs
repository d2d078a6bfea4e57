mod common;

use std::net::{Ipv4Addr, Ipv6Addr};

use common::{bridge, inspect, record, Harness};
use docker_ddns::dispatcher::Ipv6Rewrite;
use docker_ddns::error::RuntimeError;
use docker_ddns::types::{Action, LifecycleEvent};

fn event(action: Action, id: &str, name: &str) -> LifecycleEvent {
    LifecycleEvent {
        action,
        container_id: id.into(),
        actor_name: name.into(),
    }
}

#[tokio::test]
async fn start_with_ipv4_is_applied_and_cached() {
    let h = Harness::new(None);
    h.runtime.push_inspect("c1", Ok(bridge("c1", "web1", "10.0.0.5")));

    h.pipeline.handle(event(Action::Start, "c1", "web")).await;

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Action::Start);
    assert_eq!(calls[0].1.hostname, "web1");
    assert_eq!(calls[0].1.ipv4, Some(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(h.cache.get("c1").await.unwrap().hostname, "web1");
}

#[tokio::test]
async fn die_of_vanished_container_uses_and_consumes_cache() {
    let h = Harness::new(None);
    h.cache.put("c1", record("c1", "web1", "10.0.0.5")).await;

    h.pipeline.handle(event(Action::Die, "c1", "web")).await;

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Action::Die);
    assert_eq!(calls[0].1.hostname, "web1");
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn die_without_inspect_or_cache_is_dropped() {
    let h = Harness::new(None);

    h.pipeline.handle(event(Action::Die, "c1", "web")).await;

    assert_eq!(h.backend.count(), 0);
    assert_eq!(h.runtime.inspect_count(), 1);
}

#[tokio::test]
async fn die_prefers_cached_snapshot_over_live_inspect() {
    let h = Harness::new(None);
    h.cache.put("c1", record("c1", "web1", "10.0.0.5")).await;
    // A stopped container has already lost its address.
    h.runtime.push_inspect("c1", Ok(bridge("c1", "web1", "")));

    h.pipeline.handle(event(Action::Die, "c1", "web")).await;

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.ipv4, Some(Ipv4Addr::new(10, 0, 0, 5)));
    assert!(h.cache.get("c1").await.is_none());
}

#[tokio::test]
async fn shared_namespaces_never_reach_the_backend() {
    let h = Harness::new(None);
    h.runtime
        .push_inspect("c1", Ok(inspect("c1", "hostnet", "host", "", "")));
    h.runtime.push_inspect(
        "c2",
        Ok(inspect("c2", "sidecar", "container:abc123", "", "")),
    );

    h.pipeline.handle(event(Action::Start, "c1", "hostnet")).await;
    h.pipeline.handle(event(Action::Start, "c2", "sidecar")).await;

    assert_eq!(h.backend.count(), 0);
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn unspecified_ipv4_without_ipv6_is_not_sent() {
    let h = Harness::new(None);
    h.runtime.push_inspect("c1", Ok(bridge("c1", "web1", "0.0.0.0")));

    h.pipeline.handle(event(Action::Start, "c1", "web")).await;

    assert_eq!(h.backend.count(), 0);
}

#[tokio::test]
async fn timeout_without_cache_retries_once_then_drops() {
    let h = Harness::new(None);
    h.runtime.push_inspect("c1", Err(RuntimeError::Timeout(15)));
    h.runtime.push_inspect("c1", Err(RuntimeError::Timeout(15)));
    h.runtime.push_inspect("c1", Ok(bridge("c1", "web1", "10.0.0.5")));

    h.pipeline.handle(event(Action::Start, "c1", "web")).await;

    assert_eq!(h.runtime.inspect_count(), 2);
    assert_eq!(h.backend.count(), 0);
}

#[tokio::test]
async fn timeout_recovers_on_the_retry() {
    let h = Harness::new(None);
    h.runtime.push_inspect("c1", Err(RuntimeError::Timeout(15)));
    h.runtime.push_inspect("c1", Ok(bridge("c1", "web1", "10.0.0.5")));

    h.pipeline.handle(event(Action::Start, "c1", "web")).await;

    assert_eq!(h.runtime.inspect_count(), 2);
    assert_eq!(h.backend.count(), 1);
}

#[tokio::test]
async fn timeout_with_cached_snapshot_uses_it() {
    let h = Harness::new(None);
    h.cache.put("c1", record("c1", "web1", "10.0.0.5")).await;
    h.runtime.push_inspect("c1", Err(RuntimeError::Timeout(15)));

    h.pipeline.handle(event(Action::Die, "c1", "web")).await;

    assert_eq!(h.runtime.inspect_count(), 1);
    assert_eq!(h.backend.calls()[0].0, Action::Die);
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn other_runtime_errors_drop_the_event() {
    let h = Harness::new(None);
    h.cache.put("c1", record("c1", "web1", "10.0.0.5")).await;
    h.runtime
        .push_inspect("c1", Err(RuntimeError::Api("daemon exploded".into())));

    h.pipeline.handle(event(Action::Start, "c1", "web")).await;

    assert_eq!(h.runtime.inspect_count(), 1);
    assert_eq!(h.backend.count(), 0);
}

#[tokio::test]
async fn ipv6_is_rewritten_before_the_backend_sees_it() {
    let h = Harness::new(Some(Ipv6Rewrite::new("ffc0::", "2001:db32::")));
    h.runtime.push_inspect(
        "c1",
        Ok(inspect("c1", "web1", "default", "10.0.0.5", "ffc0::1")),
    );

    h.pipeline.handle(event(Action::Start, "c1", "web")).await;

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].1.ipv6,
        Some("2001:db32::1".parse::<Ipv6Addr>().unwrap())
    );
    // The cache keeps the address as the runtime reported it.
    assert_eq!(
        h.cache.get("c1").await.unwrap().ipv6,
        Some("ffc0::1".parse::<Ipv6Addr>().unwrap())
    );
}
