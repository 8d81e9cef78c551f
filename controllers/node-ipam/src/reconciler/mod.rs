//! Reconciliation logic for node pools and pods.
//!
//! - `expand`: growing a pool before it runs out of free entries
//! - `recycle`: releasing addresses whose owner workload is gone
//! - `bind`: reserving addresses for pod owners
//! - `node_pool` / `pod`: per-key entry points driven by the work queues
//!
//! Every mutation is made on a private copy of the pool and persisted with a
//! conditional write. A conflicting write triggers a re-read and a fresh
//! computation, up to `conflict_retries` times.

pub mod bind;
pub mod expand;
pub mod recycle;
mod node_pool;
mod pod;

use crate::cache::{Lister, OwnerLookup};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crds::NodeIPPool;
use k8s_openapi::api::core::v1::Pod;
use pool_client::{PoolClientError, PoolClientTrait};
use recycle::RecycleTracker;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// What the worker should do with a key after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    RequeueAfter(Duration),
}

/// Result of computing a change on a pool copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mutation<T> {
    /// The copy is unchanged; nothing to write
    Unchanged(T),
    /// The copy was modified and must be written back
    Changed(T),
}

/// Reconciles node pools and pods.
pub struct Reconciler {
    pub(crate) pools: Arc<dyn Lister<NodeIPPool>>,
    pub(crate) pods: Arc<dyn Lister<Pod>>,
    pub(crate) owners: Arc<dyn OwnerLookup>,
    pub(crate) client: Arc<dyn PoolClientTrait>,
    pub(crate) config: ControllerConfig,
    recycle_tracker: Mutex<RecycleTracker>,
}

impl Reconciler {
    pub fn new(
        pools: Arc<dyn Lister<NodeIPPool>>,
        pods: Arc<dyn Lister<Pod>>,
        owners: Arc<dyn OwnerLookup>,
        client: Arc<dyn PoolClientTrait>,
        config: ControllerConfig,
    ) -> Self {
        let recycle_tracker = Mutex::new(RecycleTracker::new(config.recycle_grace));
        Self {
            pools,
            pods,
            owners,
            client,
            config,
            recycle_tracker,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub(crate) fn recycle_tracker(&self) -> MutexGuard<'_, RecycleTracker> {
        self.recycle_tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `mutate` to a copy of `pool` and writes the copy back if it
    /// changed.
    ///
    /// On a write conflict the pool is re-read from the API server and
    /// `mutate` runs again on the fresh copy. Returns the value produced by
    /// the last (successful) computation.
    pub(crate) async fn write_back<T, F>(&self, pool: &NodeIPPool, mut mutate: F) -> Result<T, ControllerError>
    where
        F: FnMut(&mut NodeIPPool) -> Result<Mutation<T>, ControllerError>,
    {
        let name = pool
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::MalformedData("NodeIPPool missing name".to_string()))?;

        let mut current = pool.clone();
        let mut attempt = 0;
        loop {
            let mut copy = current.clone();
            let value = match mutate(&mut copy)? {
                Mutation::Unchanged(value) => {
                    debug!("NodeIPPool {} unchanged, skipping write", name);
                    return Ok(value);
                }
                Mutation::Changed(value) => value,
            };

            match self.client.update_pool(&copy).await {
                Ok(_) => return Ok(value),
                Err(PoolClientError::Conflict(msg)) => {
                    if attempt >= self.config.conflict_retries {
                        return Err(ControllerError::Conflict(format!(
                            "NodeIPPool {} still conflicting after {} retries: {}",
                            name, attempt, msg
                        )));
                    }
                    attempt += 1;
                    warn!("Write conflict on NodeIPPool {} (retry {}/{}), re-reading", name, attempt, self.config.conflict_retries);
                    current = match self.client.get_pool(&name).await {
                        Ok(fresh) => fresh,
                        Err(PoolClientError::NotFound(_)) => return Err(ControllerError::PoolNotFound(name)),
                        Err(e) => return Err(e.into()),
                    };
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
