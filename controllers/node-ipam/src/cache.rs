//! Local, eventually-consistent view of cluster resources.
//!
//! Each cache wraps a kube-runtime reflector store fed by a watcher task.
//! Reads fail with [`CacheError::NotSynced`] until the initial list has been
//! applied, so a worker never mistakes "not loaded yet" for "deleted".

use crds::{OwnerIdentity, OwnerKind};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use kube::Resource;
use kube_runtime::reflector::{ObjectRef, Store};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::info;

/// Errors raised by cache reads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Initial list not applied yet
    #[error("{0} cache has not synced yet")]
    NotSynced(&'static str),

    /// The watcher feeding the cache is gone
    #[error("{0} cache writer dropped")]
    WriterDropped(&'static str),
}

/// Read access to cached objects by key.
///
/// Keys are `<name>` for cluster-scoped objects and `<namespace>/<name>` for
/// namespaced ones. `Ok(None)` means the object does not exist.
pub trait Lister<K>: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Arc<K>>, CacheError>;
}

/// Liveness of an owner workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerState {
    Present,
    Missing,
    /// Kind the controller does not watch
    Unsupported,
}

/// Existence checks for owner workloads.
pub trait OwnerLookup: Send + Sync {
    fn lookup(&self, owner: &OwnerIdentity) -> Result<OwnerState, CacheError>;
}

/// Stable queue key of an object: `<namespace>/<name>` or `<name>`.
pub fn object_key<K: Resource>(obj: &K) -> Option<String> {
    let meta = obj.meta();
    let name = meta.name.as_deref()?;
    Some(match meta.namespace.as_deref() {
        Some(namespace) => format!("{}/{}", namespace, name),
        None => name.to_string(),
    })
}

fn object_ref<K>(key: &str) -> ObjectRef<K>
where
    K: Resource,
    K::DynamicType: Default,
{
    match key.split_once('/') {
        Some((namespace, name)) => ObjectRef::new(name).within(namespace),
        None => ObjectRef::new(key),
    }
}

/// Reflector-backed cache for one resource kind.
pub struct ResourceCache<K>
where
    K: Resource + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    kind: &'static str,
    store: Store<K>,
    synced: Arc<AtomicBool>,
}

impl<K> Clone for ResourceCache<K>
where
    K: Resource + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            store: self.store.clone(),
            synced: Arc::clone(&self.synced),
        }
    }
}

impl<K> ResourceCache<K>
where
    K: Resource + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

impl<K> fmt::Debug for ResourceCache<K>
where
    K: Resource + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("kind", &self.kind)
            .field("synced", &self.is_synced())
            .finish()
    }
}

impl<K> ResourceCache<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone + Default,
{
    pub fn new(kind: &'static str, store: Store<K>) -> Self {
        Self {
            kind,
            store,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Waits for the initial list, then opens the cache for reads.
    pub async fn wait_synced(&self) -> Result<(), CacheError> {
        self.store
            .wait_until_ready()
            .await
            .map_err(|_| CacheError::WriterDropped(self.kind))?;
        self.synced.store(true, Ordering::Release);
        info!("{} cache synced ({} objects)", self.kind, self.store.state().len());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Arc<K>>, CacheError> {
        if !self.is_synced() {
            return Err(CacheError::NotSynced(self.kind));
        }
        Ok(self.store.get(&object_ref(key)))
    }

    /// Returns true if an object with `key` is cached.
    pub fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.read(key)?.is_some())
    }
}

impl<K> Lister<K> for ResourceCache<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Default + Send + Sync,
{
    fn get(&self, key: &str) -> Result<Option<Arc<K>>, CacheError> {
        self.read(key)
    }
}

/// Caches for every owner kind the controller can verify.
#[derive(Debug, Clone)]
pub struct OwnerCaches {
    pub stateful_sets: ResourceCache<StatefulSet>,
    pub deployments: ResourceCache<Deployment>,
    pub replica_sets: ResourceCache<ReplicaSet>,
    pub daemon_sets: ResourceCache<DaemonSet>,
    pub jobs: ResourceCache<Job>,
}

impl OwnerCaches {
    pub async fn wait_synced(&self) -> Result<(), CacheError> {
        self.stateful_sets.wait_synced().await?;
        self.deployments.wait_synced().await?;
        self.replica_sets.wait_synced().await?;
        self.daemon_sets.wait_synced().await?;
        self.jobs.wait_synced().await
    }
}

impl OwnerLookup for OwnerCaches {
    fn lookup(&self, owner: &OwnerIdentity) -> Result<OwnerState, CacheError> {
        let key = format!("{}/{}", owner.namespace, owner.name);
        let exists = match owner.kind {
            OwnerKind::StatefulSet => self.stateful_sets.contains(&key)?,
            OwnerKind::Deployment => self.deployments.contains(&key)?,
            OwnerKind::ReplicaSet => self.replica_sets.contains(&key)?,
            OwnerKind::DaemonSet => self.daemon_sets.contains(&key)?,
            OwnerKind::Job => self.jobs.contains(&key)?,
            OwnerKind::Other(_) => return Ok(OwnerState::Unsupported),
        };
        Ok(if exists { OwnerState::Present } else { OwnerState::Missing })
    }
}
