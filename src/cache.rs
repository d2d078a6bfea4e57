//! Last known metadata per container id.
//!
//! The cache lets a `die` event be resolved after the runtime has already
//! forgotten the container. It is shared by every worker through a cheap
//! cloneable handle; `put`, `get` and `pop` each take the lock exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::types::ContainerRecord;

#[derive(Debug, Clone, Default)]
pub struct ContainerCache {
    inner: Arc<RwLock<HashMap<String, ContainerRecord>>>,
}

impl ContainerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record` under `id`, replacing any earlier snapshot.
    pub async fn put(&self, id: &str, record: ContainerRecord) {
        self.inner.write().await.insert(id.to_string(), record);
    }

    pub async fn get(&self, id: &str) -> Option<ContainerRecord> {
        self.inner.read().await.get(id).cloned()
    }

    /// Reads and removes the snapshot for `id` in one step.
    pub async fn pop(&self, id: &str) -> Option<ContainerRecord> {
        self.inner.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, hostname: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.into(),
            name: hostname.into(),
            hostname: hostname.into(),
            ipv4: Some("10.0.0.5".parse().unwrap()),
            ipv6: None,
            service_markers: Vec::new(),
            network_mode: "bridge".into(),
        }
    }

    #[tokio::test]
    async fn put_overwrites_and_pop_consumes() {
        let cache = ContainerCache::new();
        assert!(cache.is_empty().await);

        cache.put("c1", record("c1", "web1")).await;
        cache.put("c1", record("c1", "web2")).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("c1").await.unwrap().hostname, "web2");

        assert_eq!(cache.pop("c1").await.unwrap().hostname, "web2");
        assert!(cache.pop("c1").await.is_none());
        assert!(cache.get("c1").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_pops_hand_out_the_entry_once() {
        let cache = ContainerCache::new();
        cache.put("c1", record("c1", "web1")).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.pop("c1").await.is_some() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
