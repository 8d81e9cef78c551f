//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires caches, queues
//! and the reconciler together and runs the worker loops:
//! - NodeIPPool keys: recycling and expansion
//! - Pod keys: binding owner workloads to pool addresses

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::queue::WorkQueue;
use crate::reconciler::{Outcome, Reconciler};
use crate::watcher::{WatchHandle, spawn_owner_watches, spawn_watch};
use crds::NodeIPPool;
use futures::future::{join_all, select_all};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use pool_client::PoolClient;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Which reconcile a queue feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    NodePool,
    Pod,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::NodePool => f.write_str("NodeIPPool"),
            ResourceKind::Pod => f.write_str("Pod"),
        }
    }
}

/// Main controller for node IP pools.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    pool_queue: WorkQueue<String>,
    pod_queue: WorkQueue<String>,
    watchers: Vec<(&'static str, WatchHandle)>,
}

impl Controller {
    /// Connects to the cluster, starts all watchers and waits for their
    /// caches to sync.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Node IPAM Controller");

        let client = Client::try_default().await?;

        let pool_queue = WorkQueue::new("NodeIPPool", config.backoff_base, config.backoff_max);
        let pod_queue = WorkQueue::new("Pod", config.backoff_base, config.backoff_max);

        // The initial list of each watch enqueues every existing pool and pod
        let (pools, pool_watcher) = spawn_watch::<NodeIPPool>(Api::all(client.clone()), "NodeIPPool", Some(pool_queue.clone()));
        let (pods, pod_watcher) = spawn_watch::<Pod>(Api::all(client.clone()), "Pod", Some(pod_queue.clone()));
        let (owners, mut watchers) = spawn_owner_watches(&client);
        watchers.push(("NodeIPPool", pool_watcher));
        watchers.push(("Pod", pod_watcher));

        info!("Waiting for caches to sync...");
        pools.wait_synced().await?;
        pods.wait_synced().await?;
        owners.wait_synced().await?;
        info!("All caches synced ({} pools, {} pods queued)", pool_queue.len(), pod_queue.len());

        let reconciler = Reconciler::new(
            Arc::new(pools),
            Arc::new(pods),
            Arc::new(owners),
            Arc::new(PoolClient::new(client)),
            config,
        );

        Ok(Self {
            reconciler: Arc::new(reconciler),
            pool_queue,
            pod_queue,
            watchers,
        })
    }

    /// Runs the workers until a shutdown signal or a watcher failure.
    pub async fn run(self) -> Result<(), ControllerError> {
        let config = self.reconciler.config();
        info!(
            "Node IPAM Controller running ({} pool worker(s), {} pod worker(s), bind mode {})",
            config.pool_workers, config.pod_workers, config.bind_mode
        );

        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        for _ in 0..config.pool_workers {
            workers.push(tokio::spawn(run_worker(
                self.pool_queue.clone(),
                self.reconciler.clone(),
                ResourceKind::NodePool,
            )));
        }
        for _ in 0..config.pod_workers {
            workers.push(tokio::spawn(run_worker(
                self.pod_queue.clone(),
                self.reconciler.clone(),
                ResourceKind::Pod,
            )));
        }

        let (names, handles): (Vec<&'static str>, Vec<WatchHandle>) = self.watchers.into_iter().unzip();

        let result = tokio::select! {
            signal = shutdown_signal() => signal,
            (result, index, _) = select_all(handles) => {
                let name = names[index];
                match result {
                    Ok(Ok(())) => Err(ControllerError::Watch(format!("{} watcher exited", name))),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(ControllerError::Watch(format!("{} watcher panicked: {}", name, e))),
                }
            }
        };

        if let Err(e) = &result {
            error!("Stopping controller: {}", e);
        }

        for queue in [&self.pool_queue, &self.pod_queue] {
            if !queue.is_empty() {
                info!("Dropping {} queued key(s) on shutdown", queue.len());
            }
            queue.shutdown();
        }
        join_all(workers).await;
        info!("Node IPAM Controller stopped");

        result
    }
}

/// Waits for SIGTERM or SIGINT.
async fn shutdown_signal() -> Result<(), ControllerError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| ControllerError::InvalidConfig(format!("cannot install SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| ControllerError::InvalidConfig(format!("cannot install SIGINT handler: {}", e)))?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ControllerError::InvalidConfig(format!("cannot install Ctrl+C handler: {}", e)))?;
        info!("Received Ctrl+C, shutting down");
    }
    Ok(())
}

/// Pulls keys from `queue` until it shuts down.
pub async fn run_worker(queue: WorkQueue<String>, reconciler: Arc<Reconciler>, kind: ResourceKind) {
    debug!("{} worker started", kind);
    while process_next_item(&queue, &reconciler, kind).await {}
    debug!("{} worker stopped", kind);
}

/// Processes one key. Returns false once the queue is shut down.
pub async fn process_next_item(queue: &WorkQueue<String>, reconciler: &Reconciler, kind: ResourceKind) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    let result = match kind {
        ResourceKind::NodePool => reconciler.reconcile_node_pool(&key).await,
        ResourceKind::Pod => reconciler.reconcile_pod(&key).await,
    };
    handle_result(queue, key.clone(), kind, result);
    queue.done(&key);
    true
}

/// Decides what happens to `key` after a reconcile.
fn handle_result(queue: &WorkQueue<String>, key: String, kind: ResourceKind, result: Result<Outcome, ControllerError>) {
    match result {
        Ok(Outcome::Done) => queue.forget(&key),
        Ok(Outcome::RequeueAfter(delay)) => {
            queue.forget(&key);
            debug!("{} {} requeued in {:?}", kind, key, delay);
            queue.add_after(key, delay);
        }
        Err(e) if e.is_retryable() => {
            warn!("Reconcile of {} {} failed (retry {}): {}", kind, key, queue.num_requeues(&key) + 1, e);
            queue.add_rate_limited(key);
        }
        Err(e) => {
            warn!("Dropping {} {}: {}", kind, key, e);
            queue.forget(&key);
        }
    }
}
