//! Test utilities for unit testing reconcilers
//!
//! This module provides in-memory caches and helpers for creating test data.

use crate::cache::{CacheError, Lister, OwnerLookup, OwnerState};
use crate::config::{ControllerConfig, DEFAULT_IPAM_ANNOTATION};
use crate::reconciler::Reconciler;
use crds::{AllocationRecord, NodeIPPool, NodeIPPoolSpec, OwnerIdentity};
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use pool_client::MockPoolClient;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// In-memory lister keyed like the reflector caches
pub struct StaticLister<K> {
    objects: Mutex<HashMap<String, Arc<K>>>,
    error: Option<CacheError>,
}

impl<K> StaticLister<K> {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            error: None,
        }
    }

    /// A lister whose reads always fail with `error`
    pub fn failing(error: CacheError) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            error: Some(error),
        }
    }

    pub fn insert(&self, key: &str, object: K) {
        self.objects.lock().unwrap().insert(key.to_string(), Arc::new(object));
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }
}

impl<K: Send + Sync> Lister<K> for StaticLister<K> {
    fn get(&self, key: &str) -> Result<Option<Arc<K>>, CacheError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }
}

/// Owner lookup backed by a fixed set of live identities
pub struct StaticOwners {
    live: Mutex<HashSet<String>>,
    error: Option<CacheError>,
}

impl StaticOwners {
    pub fn new(live: &[&str]) -> Self {
        Self {
            live: Mutex::new(live.iter().map(|s| s.to_string()).collect()),
            error: None,
        }
    }

    pub fn failing(error: CacheError) -> Self {
        Self {
            live: Mutex::new(HashSet::new()),
            error: Some(error),
        }
    }

    pub fn add(&self, owner: &str) {
        self.live.lock().unwrap().insert(owner.to_string());
    }

    pub fn remove(&self, owner: &str) {
        self.live.lock().unwrap().remove(owner);
    }
}

impl OwnerLookup for StaticOwners {
    fn lookup(&self, owner: &OwnerIdentity) -> Result<OwnerState, CacheError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if !owner.kind.is_supported() {
            return Ok(OwnerState::Unsupported);
        }
        Ok(if self.live.lock().unwrap().contains(&owner.to_string()) {
            OwnerState::Present
        } else {
            OwnerState::Missing
        })
    }
}

/// Helper to create a test NodeIPPool in 10.0.0.0/24 with the given
/// `(address, owner, resource)` entries
pub fn pool_with(name: &str, entries: &[(&str, &str, &str)]) -> NodeIPPool {
    let mut pool = NodeIPPool::new(name, NodeIPPoolSpec {
        pod_cidrs: vec!["10.0.0.0/24".to_string()],
        ..Default::default()
    });
    for (address, owner, resource) in entries {
        pool.spec
            .pool
            .insert(address.to_string(), AllocationRecord::reserved(*owner, *resource));
    }
    pool
}

/// Helper to create an annotated, scheduled test Pod owned by `owner`
/// (`(kind, name)`)
pub fn create_test_pod(
    namespace: &str,
    name: &str,
    node: &str,
    owner: Option<(&str, &str)>,
    pod_ip: Option<&str>,
) -> Pod {
    let mut annotations = BTreeMap::new();
    annotations.insert(DEFAULT_IPAM_ANNOTATION.to_string(), "true".to_string());

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            owner_references: owner.map(|(kind, owner_name)| {
                vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: kind.to_string(),
                    name: owner_name.to_string(),
                    uid: format!("uid-{}", owner_name),
                    controller: Some(true),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        status: pod_ip.map(|ip| PodStatus {
            pod_ip: Some(ip.to_string()),
            ..Default::default()
        }),
    }
}

/// Reconciler wired to in-memory caches and a mock pool client
pub struct TestHarness {
    pub pools: Arc<StaticLister<NodeIPPool>>,
    pub pods: Arc<StaticLister<Pod>>,
    pub owners: Arc<StaticOwners>,
    pub client: MockPoolClient,
    pub reconciler: Reconciler,
}

impl TestHarness {
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_owners(config, StaticOwners::new(&[]))
    }

    pub fn with_owners(config: ControllerConfig, owners: StaticOwners) -> Self {
        let pools = Arc::new(StaticLister::new());
        let pods = Arc::new(StaticLister::new());
        let owners = Arc::new(owners);
        let client = MockPoolClient::new();
        let reconciler = Reconciler::new(
            pools.clone(),
            pods.clone(),
            owners.clone(),
            Arc::new(client.clone()),
            config,
        );
        Self {
            pools,
            pods,
            owners,
            client,
            reconciler,
        }
    }

    /// Stores `pool` in the mock API server and in the cache
    pub fn add_pool(&self, pool: NodeIPPool) {
        let name = pool.metadata.name.clone().unwrap();
        let stored = self.client.insert_pool(pool);
        self.pools.insert(&name, stored);
    }

    /// Copies the API server state of a pool into the cache, as a watch
    /// event would
    pub fn sync_pool(&self, name: &str) {
        if let Some(stored) = self.client.stored(name) {
            self.pools.insert(name, stored);
        }
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = format!(
            "{}/{}",
            pod.metadata.namespace.clone().unwrap(),
            pod.metadata.name.clone().unwrap()
        );
        self.pods.insert(&key, pod);
    }

    pub fn stored_pool(&self, name: &str) -> NodeIPPool {
        self.client.stored(name).unwrap()
    }
}
