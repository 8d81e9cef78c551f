//! Kubernetes resource watchers.
//!
//! Each watcher keeps a reflector store up to date and, for the kinds that
//! drive reconciliation, pushes the key of every added or updated object
//! (including the initial list) onto a work queue. Deletions only update the
//! store: a deleted pool needs no work, and a deleted pod's address is
//! reclaimed by recycling once its owner is gone.

use crate::cache::{OwnerCaches, ResourceCache, object_key};
use crate::error::ControllerError;
use crate::queue::WorkQueue;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use kube::{Api, Client, Resource};
use kube_runtime::{WatchStreamExt, reflector, watcher};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type WatchHandle = JoinHandle<Result<(), ControllerError>>;

/// Starts watching `api`, returning the cache it feeds and the watch task.
///
/// With a queue, the key of every applied object is enqueued.
pub fn spawn_watch<K>(
    api: Api<K>,
    kind: &'static str,
    queue: Option<WorkQueue<String>>,
) -> (ResourceCache<K>, WatchHandle)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Default + Send + Sync,
{
    let (reader, writer) = reflector::store();
    let cache = ResourceCache::new(kind, reader);

    let handle = tokio::spawn(async move {
        info!("Starting {} watcher", kind);

        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .reflect(writer)
            .applied_objects()
            .boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(obj) => {
                    let Some(queue) = &queue else { continue };
                    match object_key(&obj) {
                        Some(key) => {
                            debug!("{} {} changed, queueing", kind, key);
                            queue.add(key);
                        }
                        None => warn!("Ignoring {} without a name", kind),
                    }
                }
                // The stream backs off and re-lists on its own
                Err(e) => warn!("{} watch error: {}", kind, e),
            }
        }

        Err(ControllerError::Watch(format!("{} watch stream ended", kind)))
    });

    (cache, handle)
}

/// Starts the reflect-only watchers for every owner kind.
pub fn spawn_owner_watches(client: &Client) -> (OwnerCaches, Vec<(&'static str, WatchHandle)>) {
    let (stateful_sets, sts) = spawn_watch::<StatefulSet>(Api::all(client.clone()), "StatefulSet", None);
    let (deployments, deploy) = spawn_watch::<Deployment>(Api::all(client.clone()), "Deployment", None);
    let (replica_sets, rs) = spawn_watch::<ReplicaSet>(Api::all(client.clone()), "ReplicaSet", None);
    let (daemon_sets, ds) = spawn_watch::<DaemonSet>(Api::all(client.clone()), "DaemonSet", None);
    let (jobs, job) = spawn_watch::<Job>(Api::all(client.clone()), "Job", None);

    let caches = OwnerCaches {
        stateful_sets,
        deployments,
        replica_sets,
        daemon_sets,
        jobs,
    };
    let handles = vec![
        ("StatefulSet", sts),
        ("Deployment", deploy),
        ("ReplicaSet", rs),
        ("DaemonSet", ds),
        ("Job", job),
    ];
    (caches, handles)
}
