//! Pod reconciler: binds a pod's owner workload to an address in its node's
//! pool.

use super::bind::{BindOutcome, bind_free_slot, bind_resolved_address};
use super::{Mutation, Outcome, Reconciler};
use crate::config::{BindMode, ControllerConfig};
use crate::error::ControllerError;
use crds::{OwnerIdentity, OwnerKind};
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Allocation request derived from a pod that needs an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodAllocationRequest {
    /// `<namespace>/<name>`
    pub pod_key: String,
    pub node_name: String,
    /// Controlling workload, from the first owner reference
    pub owner: Option<OwnerIdentity>,
    /// Address reported in `status.podIP`
    pub address: Option<IpAddr>,
}

impl PodAllocationRequest {
    /// Builds the request for `pod`, or `None` if the pod is not handled:
    /// not annotated for IPAM, filtered out by the label selector, not
    /// scheduled yet, or terminating.
    pub fn from_pod(pod: &Pod, config: &ControllerConfig) -> Result<Option<Self>, ControllerError> {
        let meta = &pod.metadata;
        let (Some(namespace), Some(name)) = (meta.namespace.as_deref(), meta.name.as_deref()) else {
            return Err(ControllerError::MalformedData("Pod missing namespace or name".to_string()));
        };
        let pod_key = format!("{}/{}", namespace, name);

        let annotated = meta
            .annotations
            .as_ref()
            .and_then(|a| a.get(&config.ipam_annotation))
            .is_some_and(|value| !value.trim().is_empty());
        if !annotated {
            return Ok(None);
        }

        let empty = BTreeMap::new();
        if !config.selects(meta.labels.as_ref().unwrap_or(&empty)) {
            return Ok(None);
        }

        if meta.deletion_timestamp.is_some() {
            return Ok(None);
        }

        let Some(node_name) = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.clone())
            .filter(|node| !node.is_empty())
        else {
            return Ok(None);
        };

        let owner = meta
            .owner_references
            .as_ref()
            .and_then(|refs| refs.first())
            .map(|r| OwnerIdentity::new(namespace, OwnerKind::from(r.kind.as_str()), r.name.clone()));

        let address = match pod.status.as_ref().and_then(|s| s.pod_ip.as_deref()) {
            Some(ip) if !ip.is_empty() => Some(ip.parse::<IpAddr>().map_err(|e| {
                ControllerError::MalformedData(format!("Pod {} has invalid podIP '{}': {}", pod_key, ip, e))
            })?),
            _ => None,
        };

        Ok(Some(Self {
            pod_key,
            node_name,
            owner,
            address,
        }))
    }
}

impl Reconciler {
    /// Ensures the owner of the pod at `key` holds an address in its node's
    /// pool.
    pub async fn reconcile_pod(&self, key: &str) -> Result<Outcome, ControllerError> {
        let Some(pod) = self.pods.get(key)? else {
            debug!("Pod {} no longer exists", key);
            return Ok(Outcome::Done);
        };

        let Some(request) = PodAllocationRequest::from_pod(&pod, &self.config)? else {
            debug!("Pod {} does not need an address", key);
            return Ok(Outcome::Done);
        };

        let Some(owner) = request.owner.as_ref() else {
            debug!("Pod {} has no owner workload, skipping", key);
            return Ok(Outcome::Done);
        };
        if !owner.kind.is_supported() {
            warn!("Pod {} owned by unsupported kind {}, skipping", key, owner.kind);
            return Ok(Outcome::Done);
        }

        let address = match (self.config.bind_mode, request.address) {
            (BindMode::Reserve, None) => None,
            (BindMode::Resolved, Some(address)) => Some(address),
            (BindMode::Reserve, Some(_)) => {
                debug!("Pod {} already has an address", key);
                return Ok(Outcome::Done);
            }
            (BindMode::Resolved, None) => {
                debug!("Pod {} has no address yet", key);
                return Ok(Outcome::Done);
            }
        };

        let pool = self
            .pools
            .get(&request.node_name)?
            .ok_or_else(|| ControllerError::PoolNotFound(request.node_name.clone()))?;

        let outcome = self
            .write_back(&pool, |copy| {
                let outcome = match address {
                    None => bind_free_slot(copy, owner, &request.pod_key)?,
                    Some(address) => bind_resolved_address(copy, owner, address, &request.pod_key)?,
                };
                Ok(if outcome.changed() {
                    Mutation::Changed(outcome)
                } else {
                    Mutation::Unchanged(outcome)
                })
            })
            .await?;

        match outcome {
            BindOutcome::Reserved(address) => {
                info!("Reserved {} in NodeIPPool {} for {} (pod {})", address, request.node_name, owner, key);
            }
            BindOutcome::AlreadyBound(address) => {
                debug!("{} already holds {} in NodeIPPool {}", owner, address, request.node_name);
            }
        }

        Ok(Outcome::Done)
    }
}
