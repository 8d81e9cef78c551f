//! Mock PoolClient for unit testing
//!
//! Stores pools in memory and enforces the same optimistic-concurrency rules
//! as the API server: every stored object carries a resourceVersion, and an
//! update whose resourceVersion is stale fails with a conflict.

use crate::error::PoolClientError;
use crate::pool_trait::PoolClientTrait;
use crds::{NodeIPPool, NodeIPPoolStatus, UsedRecord};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Mock PoolClient for testing
#[derive(Clone, Default)]
pub struct MockPoolClient {
    pub(crate) pools: Arc<Mutex<HashMap<String, NodeIPPool>>>,
    pub(crate) writes: Arc<Mutex<Vec<NodeIPPool>>>,
    pub(crate) failures: Arc<Mutex<VecDeque<PoolClientError>>>,
    pub(crate) next_version: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockPoolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPoolClient")
            .field("pools", &self.pools.lock().unwrap().len())
            .field("writes", &self.write_count())
            .finish()
    }
}

impl MockPoolClient {
    /// Create a new, empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) -> String {
        let mut next = self.next_version.lock().unwrap();
        *next += 1;
        next.to_string()
    }

    /// Store `pool` as if it had been created on the server.
    /// Returns the stored copy with its assigned resourceVersion.
    pub fn insert_pool(&self, mut pool: NodeIPPool) -> NodeIPPool {
        pool.metadata.resource_version = Some(self.bump_version());
        let name = pool.metadata.name.clone().unwrap_or_default();
        self.pools.lock().unwrap().insert(name, pool.clone());
        pool
    }

    /// Current stored copy of a pool
    pub fn stored(&self, name: &str) -> Option<NodeIPPool> {
        self.pools.lock().unwrap().get(name).cloned()
    }

    /// Modify the stored pool out of band, as another writer would.
    /// Any copy read before this call becomes stale.
    pub fn concurrent_write(&self, name: &str, f: impl FnOnce(&mut NodeIPPool)) {
        let version = self.bump_version();
        let mut pools = self.pools.lock().unwrap();
        if let Some(pool) = pools.get_mut(name) {
            f(pool);
            pool.metadata.resource_version = Some(version);
        }
    }

    /// Report addresses as used, as the dataplane would.
    pub fn set_used(&self, name: &str, addresses: &[&str]) {
        self.concurrent_write(name, |pool| {
            let used = addresses
                .iter()
                .map(|a| ((*a).to_string(), UsedRecord::default()))
                .collect();
            pool.status = Some(NodeIPPoolStatus { used });
        });
    }

    /// Make the next `update_pool` call fail with `error`.
    pub fn fail_next_update(&self, error: PoolClientError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// All successful writes, in order
    pub fn writes(&self) -> Vec<NodeIPPool> {
        self.writes.lock().unwrap().clone()
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl PoolClientTrait for MockPoolClient {
    async fn get_pool(&self, name: &str) -> Result<NodeIPPool, PoolClientError> {
        self.stored(name)
            .ok_or_else(|| PoolClientError::NotFound(format!("NodeIPPool {} not found", name)))
    }

    async fn update_pool(&self, pool: &NodeIPPool) -> Result<NodeIPPool, PoolClientError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let name = pool.metadata.name.clone()
            .ok_or_else(|| PoolClientError::InvalidRequest("NodeIPPool missing name".to_string()))?;
        let version = pool.metadata.resource_version.clone()
            .ok_or_else(|| PoolClientError::InvalidRequest(format!("NodeIPPool {} has no resourceVersion", name)))?;

        let new_version = self.bump_version();
        let mut pools = self.pools.lock().unwrap();
        let current = pools.get_mut(&name)
            .ok_or_else(|| PoolClientError::NotFound(format!("NodeIPPool {} not found", name)))?;

        if current.metadata.resource_version.as_deref() != Some(version.as_str()) {
            return Err(PoolClientError::Conflict(format!(
                "NodeIPPool {} resourceVersion {} is stale", name, version
            )));
        }

        // Status is a subresource: a replace never changes it
        let mut stored = pool.clone();
        stored.status = current.status.clone();
        stored.metadata.resource_version = Some(new_version);
        *current = stored.clone();
        drop(pools);

        self.writes.lock().unwrap().push(stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{AllocationRecord, NodeIPPoolSpec};

    fn pool(name: &str) -> NodeIPPool {
        NodeIPPool::new(name, NodeIPPoolSpec {
            pod_cidrs: vec!["10.244.1.0/24".to_string()],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_update_with_current_version_succeeds() {
        let client = MockPoolClient::new();
        let mut copy = client.insert_pool(pool("node-a"));

        copy.spec.pool.insert("10.244.1.0".to_string(), AllocationRecord::default());
        let stored = client.update_pool(&copy).await.unwrap();

        assert_ne!(stored.metadata.resource_version, copy.metadata.resource_version);
        assert_eq!(client.write_count(), 1);
        assert!(client.stored("node-a").unwrap().spec.pool.contains_key("10.244.1.0"));
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let client = MockPoolClient::new();
        let copy = client.insert_pool(pool("node-a"));
        client.set_used("node-a", &["10.244.1.0"]);

        let result = client.update_pool(&copy).await;

        assert!(matches!(result, Err(PoolClientError::Conflict(_))));
        assert_eq!(client.write_count(), 0);
    }

    #[tokio::test]
    async fn test_update_without_version_is_rejected() {
        let client = MockPoolClient::new();
        client.insert_pool(pool("node-a"));

        let result = client.update_pool(&pool("node-a")).await;

        assert!(matches!(result, Err(PoolClientError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_update_keeps_stored_status() {
        let client = MockPoolClient::new();
        client.insert_pool(pool("node-a"));
        client.set_used("node-a", &["10.244.1.7"]);

        let mut copy = client.get_pool("node-a").await.unwrap();
        copy.status = None;
        let stored = client.update_pool(&copy).await.unwrap();

        assert!(stored.is_used("10.244.1.7"));
    }
}
